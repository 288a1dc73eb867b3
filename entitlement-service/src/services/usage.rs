//! Monthly listing usage ledger.

use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::models::{ListingType, ListingUsage, MonthKey};
use crate::services::error::EntitlementError;
use crate::services::store::EntitlementStore;

#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn EntitlementStore>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self { store }
    }

    /// Counters for the month, zero if nothing was recorded. Never writes.
    pub async fn get(
        &self,
        user_id: Uuid,
        month: &MonthKey,
    ) -> Result<ListingUsage, EntitlementError> {
        Ok(self
            .store
            .get_usage(user_id, month)
            .await?
            .unwrap_or_else(|| ListingUsage::empty(user_id, month)))
    }

    /// Record one listing. Every type consumes the shared pool.
    #[instrument(skip(self), fields(user_id = %user_id, month = %month, listing_type = %listing_type))]
    pub async fn increment(
        &self,
        user_id: Uuid,
        month: &MonthKey,
        listing_type: ListingType,
    ) -> Result<ListingUsage, EntitlementError> {
        let usage = self
            .store
            .increment_usage(user_id, month, listing_type)
            .await?;
        debug!(
            free = usage.free_listings_used,
            featured = usage.featured_listings_used,
            vehicle = usage.vehicle_listings_used,
            "Usage incremented"
        );
        Ok(usage)
    }
}

//! Pricing configuration accessor.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::models::{PricingConfigEntry, PricingKey};
use crate::services::error::EntitlementError;
use crate::services::store::EntitlementStore;

/// Source of prices for chargeable listings.
#[async_trait]
pub trait PricingProvider: Send + Sync {
    /// Current price for `key`. Never fails; falls back to the key's default.
    async fn price(&self, key: PricingKey) -> Decimal;
}

/// Reads and writes the `pricing_config` table.
#[derive(Clone)]
pub struct PricingConfig {
    store: Arc<dyn EntitlementStore>,
}

impl PricingConfig {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self { store }
    }

    /// Price for a well-known key.
    ///
    /// Absent, inactive or unparsable rows and store failures all yield the
    /// key's default.
    #[instrument(skip(self), fields(key = %key.as_str()))]
    pub async fn get(&self, key: PricingKey) -> Decimal {
        match self.store.get_pricing_entry(key.as_str()).await {
            Ok(Some(entry)) if entry.is_active => match entry.decimal_value() {
                Some(value) => value,
                None => {
                    warn!(value = %entry.config_value, "Unparsable pricing value, using default");
                    key.default_value()
                }
            },
            Ok(_) => key.default_value(),
            Err(e) => {
                warn!(error = %e, "Pricing lookup failed, using default");
                key.default_value()
            }
        }
    }

    /// Store a price under `key`, activating the row.
    #[instrument(skip(self))]
    pub async fn set(
        &self,
        key: &str,
        value: Decimal,
    ) -> Result<PricingConfigEntry, EntitlementError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(EntitlementError::InvalidInput(
                "Pricing key must not be empty".to_string(),
            ));
        }
        if value.is_sign_negative() {
            return Err(EntitlementError::InvalidInput(format!(
                "Price for '{}' must not be negative",
                key
            )));
        }

        let entry = self
            .store
            .upsert_pricing_entry(key, &serde_json::Value::String(value.to_string()))
            .await?;
        info!(key = %key, value = %value, "Pricing updated");
        Ok(entry)
    }

    /// Every active price, with defaults filled in for missing well-known keys.
    #[instrument(skip(self))]
    pub async fn all(&self) -> Result<BTreeMap<String, Decimal>, EntitlementError> {
        let mut prices = BTreeMap::new();
        for entry in self.store.list_pricing_entries().await? {
            if !entry.is_active {
                continue;
            }
            if let Some(value) = entry.decimal_value() {
                prices.insert(entry.config_key, value);
            }
        }
        for key in PricingKey::ALL {
            prices
                .entry(key.as_str().to_string())
                .or_insert_with(|| key.default_value());
        }
        Ok(prices)
    }
}

#[async_trait]
impl PricingProvider for PricingConfig {
    async fn price(&self, key: PricingKey) -> Decimal {
        self.get(key).await
    }
}

/// Fixed prices, handy where no store is wired in.
#[derive(Debug, Clone, Default)]
pub struct StaticPricing {
    overrides: BTreeMap<&'static str, Decimal>,
}

impl StaticPricing {
    pub fn with_price(mut self, key: PricingKey, value: Decimal) -> Self {
        self.overrides.insert(key.as_str(), value);
        self
    }
}

#[async_trait]
impl PricingProvider for StaticPricing {
    async fn price(&self, key: PricingKey) -> Decimal {
        self.overrides
            .get(key.as_str())
            .copied()
            .unwrap_or_else(|| key.default_value())
    }
}

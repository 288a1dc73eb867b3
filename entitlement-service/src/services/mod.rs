//! Services module for entitlement-service.

pub mod database;
pub mod entitlement;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod plans;
pub mod pricing;
pub mod store;
pub mod subscriptions;
pub mod usage;
pub mod workflow;

use std::sync::Arc;

pub use database::Database;
pub use entitlement::EntitlementEngine;
pub use error::EntitlementError;
pub use memory::InMemoryStore;
pub use metrics::{
    get_metrics, init_metrics, record_error, record_grpc_request, record_grpc_request_duration,
};
pub use plans::PlanRegistry;
pub use pricing::{PricingConfig, PricingProvider, StaticPricing};
pub use store::EntitlementStore;
pub use subscriptions::SubscriptionManager;
pub use usage::UsageLedger;
pub use workflow::{ImageUploader, ListingCreationWorkflow, ListingPublisher, PaymentCollector};

/// Every component wired over one store.
#[derive(Clone)]
pub struct EntitlementServices {
    pub store: Arc<dyn EntitlementStore>,
    pub pricing: PricingConfig,
    pub plans: PlanRegistry,
    pub subscriptions: SubscriptionManager,
    pub usage: UsageLedger,
    pub engine: EntitlementEngine,
}

impl EntitlementServices {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        let pricing = PricingConfig::new(store.clone());
        let plans = PlanRegistry::new(store.clone());
        let subscriptions = SubscriptionManager::new(store.clone(), plans.clone());
        let usage = UsageLedger::new(store.clone());
        let engine = EntitlementEngine::new(
            store.clone(),
            subscriptions.clone(),
            usage.clone(),
            Arc::new(pricing.clone()),
        );

        Self {
            store,
            pricing,
            plans,
            subscriptions,
            usage,
            engine,
        }
    }
}

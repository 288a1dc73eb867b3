//! Domain models for entitlement-service.

mod entitlement;
mod listing;
mod payment;
mod plan;
mod pricing;
mod subscription;
mod usage;

pub use entitlement::{EntitlementDecision, EntitlementSummary, PlanCeilings, UsageReport};
pub use listing::{CreatedListing, ListingDraft, ListingImage, PublishListing};
pub use payment::{Payment, PaymentRequest, PaymentStatus, ADDITIONAL_LISTING_PAYMENT};
pub use plan::{
    CreatePlan, QuotaLimit, SubscriptionPlan, UpdatePlan, DEFAULT_MAX_FEATURED_LISTINGS,
    DEFAULT_MAX_LISTINGS, DEFAULT_MAX_VEHICLE_LISTINGS, FREE_PLAN_NAME, UNLIMITED,
};
pub use pricing::{PricingConfigEntry, PricingKey};
pub use subscription::{
    effective_plan_id, NewSubscription, SubscriptionStatus, UserSubscription, PERIOD_DAYS,
};
pub use usage::{ListingType, ListingUsage, MonthKey};

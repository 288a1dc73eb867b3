//! Storage abstraction shared by every component.
//!
//! `Database` implements it against PostgreSQL; `InMemoryStore` backs tests
//! and the `memory` store backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{
    CreatePlan, ListingType, ListingUsage, MonthKey, NewSubscription, PricingConfigEntry,
    SubscriptionPlan, SubscriptionStatus, UpdatePlan, UserSubscription,
};

#[async_trait]
pub trait EntitlementStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // Plans

    /// Insert a plan. A name clash surfaces as `AppError::Conflict`.
    async fn create_plan(&self, input: &CreatePlan) -> Result<SubscriptionPlan, AppError>;

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<SubscriptionPlan>, AppError>;

    async fn get_plan_by_name(&self, name: &str) -> Result<Option<SubscriptionPlan>, AppError>;

    /// Plans ordered by `sort_order`, then name.
    async fn list_plans(&self, active_only: bool) -> Result<Vec<SubscriptionPlan>, AppError>;

    /// Partial update. A name clash surfaces as `AppError::Conflict`.
    async fn update_plan(
        &self,
        plan_id: Uuid,
        input: &UpdatePlan,
    ) -> Result<Option<SubscriptionPlan>, AppError>;

    async fn delete_plan(&self, plan_id: Uuid) -> Result<bool, AppError>;

    // Subscriptions

    /// The row that governs the user at `now`: not expired and inside its window.
    async fn find_current_subscription(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<UserSubscription>, AppError>;

    /// Most recently created row regardless of status.
    async fn find_latest_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError>;

    /// Insert a subscription unless the user already holds an open one, in
    /// which case the open row is returned unchanged.
    async fn open_subscription(
        &self,
        input: &NewSubscription,
    ) -> Result<UserSubscription, AppError>;

    /// Flip a lapsed open row to `expired`. Returns `None` if it was already expired.
    async fn expire_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError>;

    /// Point the row at a new plan, making it `active` and clearing any
    /// scheduled cancellation or downgrade.
    async fn change_subscription_plan(
        &self,
        subscription_id: Uuid,
        plan_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError>;

    /// Mark the row cancelled at period end, optionally with a downgrade target.
    async fn schedule_cancellation(
        &self,
        subscription_id: Uuid,
        cancelled_at: DateTime<Utc>,
        pending_plan_id: Option<Uuid>,
    ) -> Result<Option<UserSubscription>, AppError>;

    /// Undo a scheduled cancellation.
    async fn reactivate_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError>;

    /// Set the status of an open row. `None` once the row has expired.
    async fn update_subscription_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<Option<UserSubscription>, AppError>;

    /// Active or cancelled rows whose window closed before `now`, oldest
    /// first. Suspended rows carry over on read and are left alone.
    async fn list_lapsed_subscriptions(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UserSubscription>, AppError>;

    // Usage

    async fn get_usage(
        &self,
        user_id: Uuid,
        month: &MonthKey,
    ) -> Result<Option<ListingUsage>, AppError>;

    /// Atomically add one listing of `listing_type` to the month's counters,
    /// creating the row if needed.
    async fn increment_usage(
        &self,
        user_id: Uuid,
        month: &MonthKey,
        listing_type: ListingType,
    ) -> Result<ListingUsage, AppError>;

    // Pricing

    async fn get_pricing_entry(&self, key: &str) -> Result<Option<PricingConfigEntry>, AppError>;

    async fn list_pricing_entries(&self) -> Result<Vec<PricingConfigEntry>, AppError>;

    async fn upsert_pricing_entry(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<PricingConfigEntry, AppError>;
}

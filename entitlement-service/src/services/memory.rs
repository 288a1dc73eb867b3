//! In-process store used by tests and the `memory` store backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::types::Json;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    CreatePlan, ListingType, ListingUsage, MonthKey, NewSubscription, PricingConfigEntry,
    SubscriptionPlan, SubscriptionStatus, UpdatePlan, UserSubscription,
};
use crate::services::store::EntitlementStore;

#[derive(Default)]
struct State {
    plans: HashMap<Uuid, SubscriptionPlan>,
    subscriptions: Vec<UserSubscription>,
    usage: HashMap<(Uuid, String), ListingUsage>,
    pricing: BTreeMap<String, PricingConfigEntry>,
}

impl State {
    fn subscription_mut(&mut self, subscription_id: Uuid) -> Option<&mut UserSubscription> {
        self.subscriptions
            .iter_mut()
            .find(|s| s.subscription_id == subscription_id)
    }

    fn open_subscription_for(&self, user_id: Uuid) -> Option<&UserSubscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.status().is_current())
            .max_by_key(|s| s.created_utc)
    }

    fn name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        self.plans
            .values()
            .any(|p| p.name == name && Some(p.plan_id) != except)
    }
}

/// Store keeping every table in memory behind one lock.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert a subscription row as-is, bypassing lifecycle rules.
    pub async fn insert_subscription(&self, subscription: UserSubscription) {
        self.state.write().await.subscriptions.push(subscription);
    }

    fn ensure_available(&self) -> Result<(), AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "In-memory store marked unavailable"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EntitlementStore for InMemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.ensure_available()
    }

    async fn create_plan(&self, input: &CreatePlan) -> Result<SubscriptionPlan, AppError> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        if state.name_taken(&input.name, None) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "A plan named '{}' already exists",
                input.name
            )));
        }

        let now = Utc::now();
        let plan = SubscriptionPlan {
            plan_id: Uuid::new_v4(),
            name: input.name.clone(),
            description: input.description.clone(),
            price_monthly: input.price_monthly,
            price_yearly: input.price_yearly,
            currency: input.currency.clone(),
            max_listings: input.max_listings,
            max_featured_listings: input.max_featured_listings,
            max_vehicle_listings: input.max_vehicle_listings,
            features: Json(input.features.clone()),
            is_active: input.is_active,
            sort_order: input.sort_order,
            created_utc: now,
            updated_utc: now,
        };
        state.plans.insert(plan.plan_id, plan.clone());
        Ok(plan)
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<SubscriptionPlan>, AppError> {
        self.ensure_available()?;
        Ok(self.state.read().await.plans.get(&plan_id).cloned())
    }

    async fn get_plan_by_name(&self, name: &str) -> Result<Option<SubscriptionPlan>, AppError> {
        self.ensure_available()?;
        Ok(self
            .state
            .read()
            .await
            .plans
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn list_plans(&self, active_only: bool) -> Result<Vec<SubscriptionPlan>, AppError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let mut plans: Vec<SubscriptionPlan> = state
            .plans
            .values()
            .filter(|p| !active_only || p.is_active)
            .cloned()
            .collect();
        plans.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.name.cmp(&b.name)));
        Ok(plans)
    }

    async fn update_plan(
        &self,
        plan_id: Uuid,
        input: &UpdatePlan,
    ) -> Result<Option<SubscriptionPlan>, AppError> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        if let Some(name) = &input.name {
            if state.name_taken(name, Some(plan_id)) {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "A plan named '{}' already exists",
                    name
                )));
            }
        }

        let Some(plan) = state.plans.get_mut(&plan_id) else {
            return Ok(None);
        };
        if let Some(name) = &input.name {
            plan.name = name.clone();
        }
        if let Some(description) = &input.description {
            plan.description = Some(description.clone());
        }
        if let Some(price) = input.price_monthly {
            plan.price_monthly = price;
        }
        if let Some(price) = input.price_yearly {
            plan.price_yearly = Some(price);
        }
        if let Some(max) = input.max_listings {
            plan.max_listings = max;
        }
        if let Some(max) = input.max_featured_listings {
            plan.max_featured_listings = max;
        }
        if let Some(max) = input.max_vehicle_listings {
            plan.max_vehicle_listings = max;
        }
        if let Some(features) = &input.features {
            plan.features = Json(features.clone());
        }
        if let Some(is_active) = input.is_active {
            plan.is_active = is_active;
        }
        if let Some(sort_order) = input.sort_order {
            plan.sort_order = sort_order;
        }
        plan.updated_utc = Utc::now();
        Ok(Some(plan.clone()))
    }

    async fn delete_plan(&self, plan_id: Uuid) -> Result<bool, AppError> {
        self.ensure_available()?;
        Ok(self.state.write().await.plans.remove(&plan_id).is_some())
    }

    async fn find_current_subscription(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<UserSubscription>, AppError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.is_current(now))
            .max_by_key(|s| s.created_utc)
            .cloned())
    }

    async fn find_latest_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .max_by_key(|s| s.created_utc)
            .cloned())
    }

    async fn open_subscription(
        &self,
        input: &NewSubscription,
    ) -> Result<UserSubscription, AppError> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        if let Some(existing) = state.open_subscription_for(input.user_id) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let subscription = UserSubscription {
            subscription_id: Uuid::new_v4(),
            user_id: input.user_id,
            plan_id: input.plan_id,
            status: input.status.as_str().to_string(),
            current_period_start: input.current_period_start,
            current_period_end: input.current_period_end,
            cancel_at_period_end: false,
            cancelled_at: None,
            pending_plan_id: None,
            created_utc: now,
            updated_utc: now,
        };
        state.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn expire_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        Ok(state.subscription_mut(subscription_id).and_then(|s| {
            if !s.status().is_current() {
                return None;
            }
            s.status = SubscriptionStatus::Expired.as_str().to_string();
            s.updated_utc = Utc::now();
            Some(s.clone())
        }))
    }

    async fn change_subscription_plan(
        &self,
        subscription_id: Uuid,
        plan_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        Ok(state.subscription_mut(subscription_id).and_then(|s| {
            if !matches!(
                s.status(),
                SubscriptionStatus::Active | SubscriptionStatus::Cancelled
            ) {
                return None;
            }
            s.plan_id = plan_id;
            s.status = SubscriptionStatus::Active.as_str().to_string();
            s.cancel_at_period_end = false;
            s.cancelled_at = None;
            s.pending_plan_id = None;
            s.updated_utc = Utc::now();
            Some(s.clone())
        }))
    }

    async fn schedule_cancellation(
        &self,
        subscription_id: Uuid,
        cancelled_at: DateTime<Utc>,
        pending_plan_id: Option<Uuid>,
    ) -> Result<Option<UserSubscription>, AppError> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        Ok(state.subscription_mut(subscription_id).and_then(|s| {
            if s.status() != SubscriptionStatus::Active {
                return None;
            }
            s.status = SubscriptionStatus::Cancelled.as_str().to_string();
            s.cancel_at_period_end = true;
            s.cancelled_at = Some(cancelled_at);
            s.pending_plan_id = pending_plan_id;
            s.updated_utc = Utc::now();
            Some(s.clone())
        }))
    }

    async fn reactivate_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        Ok(state.subscription_mut(subscription_id).and_then(|s| {
            if s.status() != SubscriptionStatus::Cancelled {
                return None;
            }
            s.status = SubscriptionStatus::Active.as_str().to_string();
            s.cancel_at_period_end = false;
            s.cancelled_at = None;
            s.pending_plan_id = None;
            s.updated_utc = Utc::now();
            Some(s.clone())
        }))
    }

    async fn update_subscription_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<Option<UserSubscription>, AppError> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        Ok(state.subscription_mut(subscription_id).and_then(|s| {
            if !s.status().is_current() {
                return None;
            }
            s.status = status.as_str().to_string();
            s.updated_utc = Utc::now();
            Some(s.clone())
        }))
    }

    async fn list_lapsed_subscriptions(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UserSubscription>, AppError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let mut lapsed: Vec<UserSubscription> = state
            .subscriptions
            .iter()
            .filter(|s| {
                matches!(
                    s.status(),
                    SubscriptionStatus::Active | SubscriptionStatus::Cancelled
                ) && s.has_lapsed(now)
            })
            .cloned()
            .collect();
        lapsed.sort_by_key(|s| s.current_period_end);
        lapsed.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(lapsed)
    }

    async fn get_usage(
        &self,
        user_id: Uuid,
        month: &MonthKey,
    ) -> Result<Option<ListingUsage>, AppError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        Ok(state
            .usage
            .get(&(user_id, month.to_string()))
            .cloned())
    }

    async fn increment_usage(
        &self,
        user_id: Uuid,
        month: &MonthKey,
        listing_type: ListingType,
    ) -> Result<ListingUsage, AppError> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        let usage = state
            .usage
            .entry((user_id, month.to_string()))
            .or_insert_with(|| ListingUsage::empty(user_id, month));
        usage.apply(listing_type);
        Ok(usage.clone())
    }

    async fn get_pricing_entry(&self, key: &str) -> Result<Option<PricingConfigEntry>, AppError> {
        self.ensure_available()?;
        Ok(self.state.read().await.pricing.get(key).cloned())
    }

    async fn list_pricing_entries(&self) -> Result<Vec<PricingConfigEntry>, AppError> {
        self.ensure_available()?;
        Ok(self.state.read().await.pricing.values().cloned().collect())
    }

    async fn upsert_pricing_entry(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<PricingConfigEntry, AppError> {
        self.ensure_available()?;
        let entry = PricingConfigEntry {
            config_key: key.to_string(),
            config_value: value.clone(),
            is_active: true,
            updated_utc: Utc::now(),
        };
        self.state
            .write()
            .await
            .pricing
            .insert(key.to_string(), entry.clone());
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn duplicate_plan_name_is_conflict() {
        let store = InMemoryStore::new();
        store.create_plan(&CreatePlan::free()).await.unwrap();
        let err = store.create_plan(&CreatePlan::free()).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn open_subscription_returns_existing_open_row() {
        let store = InMemoryStore::new();
        let user_id = Uuid::new_v4();
        let input = NewSubscription::starting_at(user_id, Uuid::new_v4(), Utc::now());

        let first = store.open_subscription(&input).await.unwrap();
        let second = store.open_subscription(&input).await.unwrap();
        assert_eq!(first.subscription_id, second.subscription_id);
    }

    #[tokio::test]
    async fn status_update_leaves_expired_row_alone() {
        let store = InMemoryStore::new();
        let input = NewSubscription::starting_at(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        let opened = store.open_subscription(&input).await.unwrap();
        store
            .expire_subscription(opened.subscription_id)
            .await
            .unwrap();

        let updated = store
            .update_subscription_status(opened.subscription_id, SubscriptionStatus::Active)
            .await
            .unwrap();
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn lapsed_listing_skips_suspended_rows() {
        let store = InMemoryStore::new();
        let past = Utc::now() - chrono::Duration::days(40);
        for status in [SubscriptionStatus::Active, SubscriptionStatus::Suspended] {
            let mut input = NewSubscription::starting_at(Uuid::new_v4(), Uuid::new_v4(), past);
            input.status = status;
            store.open_subscription(&input).await.unwrap();
        }

        let lapsed = store
            .list_lapsed_subscriptions(Utc::now(), 10)
            .await
            .unwrap();
        assert_eq!(lapsed.len(), 1);
        assert_eq!(lapsed[0].status(), SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryStore::new());
        let user_id = Uuid::new_v4();
        let month = MonthKey::current();

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let store = store.clone();
                let month = month.clone();
                tokio::spawn(async move {
                    store
                        .increment_usage(user_id, &month, ListingType::Vehicle)
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let usage = store.get_usage(user_id, &month).await.unwrap().unwrap();
        assert_eq!(usage.free_listings_used, 25);
        assert_eq!(usage.vehicle_listings_used, 25);
        assert_eq!(usage.featured_listings_used, 0);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(store.health_check().await.is_err());
        assert!(store.list_plans(false).await.is_err());
    }
}

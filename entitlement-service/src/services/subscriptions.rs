//! User subscription lifecycle.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::{effective_plan_id, NewSubscription, SubscriptionStatus, UserSubscription};
use crate::services::error::EntitlementError;
use crate::services::metrics::record_subscription_operation;
use crate::services::plans::PlanRegistry;
use crate::services::store::EntitlementStore;

#[derive(Clone)]
pub struct SubscriptionManager {
    store: Arc<dyn EntitlementStore>,
    plans: PlanRegistry,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn EntitlementStore>, plans: PlanRegistry) -> Self {
        Self { store, plans }
    }

    /// The user's current subscription, opening a Free one if there is none.
    pub async fn get_or_create(&self, user_id: Uuid) -> Result<UserSubscription, EntitlementError> {
        self.get_or_create_at(user_id, Utc::now()).await
    }

    /// As [`get_or_create`](Self::get_or_create) with an explicit clock.
    ///
    /// A lapsed row is expired first and replaced by a fresh period on its
    /// downgrade target, or on Free. A suspension carries into the new period.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_or_create_at(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<UserSubscription, EntitlementError> {
        if let Some(current) = self.store.find_current_subscription(user_id, now).await? {
            return Ok(current);
        }

        let free_plan_id = self.plans.ensure_free_plan().await?.plan_id;
        let mut input = NewSubscription::starting_at(user_id, free_plan_id, now);

        if let Some(latest) = self.store.find_latest_subscription(user_id).await? {
            let plan_id = self.rollover_plan(&latest, free_plan_id, now).await?;
            input = NewSubscription::starting_at(user_id, plan_id, now);
            if latest.status() == SubscriptionStatus::Suspended {
                input = input.suspended();
            }
            if latest.status().is_current() {
                self.store.expire_subscription(latest.subscription_id).await?;
                record_subscription_operation("expired");
                info!(
                    subscription_id = %latest.subscription_id,
                    next_plan_id = %plan_id,
                    "Lapsed subscription expired"
                );
            }
        }

        let subscription = self.store.open_subscription(&input).await?;
        record_subscription_operation("created");

        Ok(subscription)
    }

    /// Plan a lapsed row rolls over to: its downgrade target while that plan
    /// still exists and is active, otherwise Free.
    async fn rollover_plan(
        &self,
        lapsed: &UserSubscription,
        free_plan_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Uuid, EntitlementError> {
        let target = effective_plan_id(lapsed, free_plan_id, now);
        if target == free_plan_id {
            return Ok(free_plan_id);
        }
        match self.store.get_plan(target).await? {
            Some(plan) if plan.is_active => Ok(target),
            _ => {
                warn!(plan_id = %target, "Downgrade target no longer available, using Free");
                Ok(free_plan_id)
            }
        }
    }

    /// Move the user onto `plan_id` immediately, keeping the period window.
    #[instrument(skip(self), fields(user_id = %user_id, plan_id = %plan_id))]
    pub async fn upgrade(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
    ) -> Result<UserSubscription, EntitlementError> {
        let plan = self.plans.get_subscribable(plan_id).await?;
        let current = self.get_or_create(user_id).await?;
        if current.status() == SubscriptionStatus::Suspended {
            return Err(EntitlementError::InvalidState(
                "Subscription is suspended".to_string(),
            ));
        }

        let subscription = self
            .store
            .change_subscription_plan(current.subscription_id, plan.plan_id)
            .await?
            .ok_or_else(|| {
                EntitlementError::InvalidState("Subscription changed concurrently".to_string())
            })?;

        record_subscription_operation("upgraded");
        info!(plan = %plan.name, "Subscription upgraded");
        Ok(subscription)
    }

    /// Cancel at period end. Benefits stay until `current_period_end`.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn cancel(&self, user_id: Uuid) -> Result<UserSubscription, EntitlementError> {
        let subscription = self.end_period(user_id, None).await?;
        record_subscription_operation("cancelled");
        info!("Subscription cancelled at period end");
        Ok(subscription)
    }

    /// Schedule a move to `plan_id` when the current period ends.
    #[instrument(skip(self), fields(user_id = %user_id, plan_id = %plan_id))]
    pub async fn downgrade(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
    ) -> Result<UserSubscription, EntitlementError> {
        let target = self.plans.get_subscribable(plan_id).await?;
        let subscription = self.end_period(user_id, Some(target.plan_id)).await?;
        record_subscription_operation("downgraded");
        info!(plan = %target.name, "Downgrade scheduled");
        Ok(subscription)
    }

    async fn end_period(
        &self,
        user_id: Uuid,
        pending_plan_id: Option<Uuid>,
    ) -> Result<UserSubscription, EntitlementError> {
        let now = Utc::now();
        let current = self
            .store
            .find_current_subscription(user_id, now)
            .await?
            .ok_or(EntitlementError::NoActiveSubscription(user_id))?;

        match current.status() {
            SubscriptionStatus::Active => {}
            SubscriptionStatus::Cancelled => {
                return Err(EntitlementError::InvalidState(
                    "Subscription is already cancelled".to_string(),
                ))
            }
            other => {
                return Err(EntitlementError::InvalidState(format!(
                    "Subscription is {}",
                    other.as_str()
                )))
            }
        }

        let free_plan_id = self.plans.ensure_free_plan().await?.plan_id;
        if current.plan_id == free_plan_id {
            return Err(EntitlementError::InvalidState(
                "Free plan subscriptions cannot be cancelled".to_string(),
            ));
        }
        if pending_plan_id == Some(current.plan_id) {
            return Err(EntitlementError::InvalidState(
                "Subscription is already on that plan".to_string(),
            ));
        }

        self.store
            .schedule_cancellation(current.subscription_id, now, pending_plan_id)
            .await?
            .ok_or_else(|| {
                EntitlementError::InvalidState("Subscription changed concurrently".to_string())
            })
    }

    /// Undo a cancellation or scheduled downgrade before the period ends.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn reactivate(&self, user_id: Uuid) -> Result<UserSubscription, EntitlementError> {
        let latest = self
            .store
            .find_latest_subscription(user_id)
            .await?
            .ok_or(EntitlementError::NoActiveSubscription(user_id))?;

        if latest.status() != SubscriptionStatus::Cancelled {
            return Err(EntitlementError::InvalidState(format!(
                "Only cancelled subscriptions can be reactivated, subscription is {}",
                latest.status().as_str()
            )));
        }
        if latest.has_lapsed(Utc::now()) {
            return Err(EntitlementError::InvalidState(
                "Subscription period has already ended".to_string(),
            ));
        }

        let subscription = self
            .store
            .reactivate_subscription(latest.subscription_id)
            .await?
            .ok_or_else(|| {
                EntitlementError::InvalidState("Subscription changed concurrently".to_string())
            })?;

        record_subscription_operation("reactivated");
        info!("Subscription reactivated");
        Ok(subscription)
    }

    /// Block listing creation for the user.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn suspend(&self, user_id: Uuid) -> Result<UserSubscription, EntitlementError> {
        let current = self.get_or_create(user_id).await?;
        if current.status() == SubscriptionStatus::Suspended {
            return Err(EntitlementError::InvalidState(
                "Subscription is already suspended".to_string(),
            ));
        }

        let subscription = self
            .store
            .update_subscription_status(current.subscription_id, SubscriptionStatus::Suspended)
            .await?
            .ok_or_else(|| {
                EntitlementError::InvalidState("Subscription changed concurrently".to_string())
            })?;

        record_subscription_operation("suspended");
        warn!("Subscription suspended");
        Ok(subscription)
    }

    /// Lift a suspension. A row that was cancelled before suspension goes
    /// back to `cancelled`.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn resume(&self, user_id: Uuid) -> Result<UserSubscription, EntitlementError> {
        if self.store.find_latest_subscription(user_id).await?.is_none() {
            return Err(EntitlementError::NoActiveSubscription(user_id));
        }
        let current = self.get_or_create(user_id).await?;
        if current.status() != SubscriptionStatus::Suspended {
            return Err(EntitlementError::InvalidState(
                "Subscription is not suspended".to_string(),
            ));
        }

        let status = if current.cancel_at_period_end {
            SubscriptionStatus::Cancelled
        } else {
            SubscriptionStatus::Active
        };
        let subscription = self
            .store
            .update_subscription_status(current.subscription_id, status)
            .await?
            .ok_or_else(|| {
                EntitlementError::InvalidState("Subscription changed concurrently".to_string())
            })?;

        record_subscription_operation("resumed");
        info!(status = %status.as_str(), "Subscription resumed");
        Ok(subscription)
    }

    /// Materialise up to `batch_size` lapsed subscriptions.
    ///
    /// Reads never depend on this; it keeps the table tidy. Returns the number
    /// of users rolled over.
    #[instrument(skip(self))]
    pub async fn reconcile_lapsed(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<usize, EntitlementError> {
        let lapsed = self.store.list_lapsed_subscriptions(now, batch_size).await?;
        let mut rolled_over = 0;

        for subscription in lapsed {
            match self.get_or_create_at(subscription.user_id, now).await {
                Ok(_) => rolled_over += 1,
                Err(e) => warn!(
                    user_id = %subscription.user_id,
                    error = %e,
                    "Failed to roll over lapsed subscription"
                ),
            }
        }

        if rolled_over > 0 {
            info!(count = rolled_over, "Lapsed subscriptions reconciled");
        }
        Ok(rolled_over)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreatePlan, PERIOD_DAYS};
    use crate::services::memory::InMemoryStore;
    use chrono::Duration;
    use rust_decimal::Decimal;

    struct Fixture {
        store: Arc<InMemoryStore>,
        plans: PlanRegistry,
        manager: SubscriptionManager,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let plans = PlanRegistry::new(store.clone());
        let manager = SubscriptionManager::new(store.clone(), plans.clone());
        Fixture {
            store,
            plans,
            manager,
        }
    }

    async fn paid_plan(plans: &PlanRegistry, name: &str) -> Uuid {
        let mut input = CreatePlan::free();
        input.name = name.to_string();
        input.price_monthly = Decimal::new(999, 2);
        input.max_listings = 25;
        plans.create(input).await.unwrap().plan_id
    }

    fn lapsed_row(user_id: Uuid, plan_id: Uuid, status: SubscriptionStatus) -> UserSubscription {
        let end = Utc::now() - Duration::days(1);
        UserSubscription {
            subscription_id: Uuid::new_v4(),
            user_id,
            plan_id,
            status: status.as_str().to_string(),
            current_period_start: end - Duration::days(PERIOD_DAYS),
            current_period_end: end,
            cancel_at_period_end: status == SubscriptionStatus::Cancelled,
            cancelled_at: None,
            pending_plan_id: None,
            created_utc: end - Duration::days(PERIOD_DAYS),
            updated_utc: end,
        }
    }

    #[tokio::test]
    async fn new_user_lands_on_free_plan() {
        let f = fixture();
        let user_id = Uuid::new_v4();

        let first = f.manager.get_or_create(user_id).await.unwrap();
        let second = f.manager.get_or_create(user_id).await.unwrap();

        let free = f.plans.ensure_free_plan().await.unwrap();
        assert_eq!(first.subscription_id, second.subscription_id);
        assert_eq!(first.plan_id, free.plan_id);
        assert_eq!(first.status(), SubscriptionStatus::Active);
        assert_eq!(
            first.current_period_end - first.current_period_start,
            Duration::days(PERIOD_DAYS)
        );
    }

    #[tokio::test]
    async fn cancelled_subscription_keeps_plan_until_period_end() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let pro = paid_plan(&f.plans, "Pro").await;
        f.manager.upgrade(user_id, pro).await.unwrap();

        let cancelled = f.manager.cancel(user_id).await.unwrap();
        assert_eq!(cancelled.status(), SubscriptionStatus::Cancelled);
        assert!(cancelled.cancel_at_period_end);

        let current = f.manager.get_or_create(user_id).await.unwrap();
        assert_eq!(current.subscription_id, cancelled.subscription_id);
        assert_eq!(current.plan_id, pro);
    }

    #[tokio::test]
    async fn lapsed_row_rolls_over_to_free() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let pro = paid_plan(&f.plans, "Pro").await;
        let old = lapsed_row(user_id, pro, SubscriptionStatus::Cancelled);
        f.store.insert_subscription(old.clone()).await;

        let current = f.manager.get_or_create(user_id).await.unwrap();
        let free = f.plans.ensure_free_plan().await.unwrap();
        assert_ne!(current.subscription_id, old.subscription_id);
        assert_eq!(current.plan_id, free.plan_id);
    }

    #[tokio::test]
    async fn lapsed_downgrade_rolls_over_to_target() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let pro = paid_plan(&f.plans, "Pro").await;
        let basic = paid_plan(&f.plans, "Basic").await;
        let mut old = lapsed_row(user_id, pro, SubscriptionStatus::Cancelled);
        old.pending_plan_id = Some(basic);
        f.store.insert_subscription(old).await;

        let current = f.manager.get_or_create(user_id).await.unwrap();
        assert_eq!(current.plan_id, basic);
    }

    #[tokio::test]
    async fn upgrade_clears_scheduled_downgrade() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let pro = paid_plan(&f.plans, "Pro").await;
        let basic = paid_plan(&f.plans, "Basic").await;
        f.manager.upgrade(user_id, pro).await.unwrap();
        f.manager.downgrade(user_id, basic).await.unwrap();

        let upgraded = f.manager.upgrade(user_id, pro).await.unwrap();
        assert_eq!(upgraded.status(), SubscriptionStatus::Active);
        assert_eq!(upgraded.pending_plan_id, None);
        assert!(!upgraded.cancel_at_period_end);
    }

    #[tokio::test]
    async fn cannot_cancel_free_plan() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        f.manager.get_or_create(user_id).await.unwrap();
        let err = f.manager.cancel(user_id).await.unwrap_err();
        assert!(matches!(err, EntitlementError::InvalidState(_)));
    }

    #[tokio::test]
    async fn cancel_without_subscription_is_not_found() {
        let f = fixture();
        let err = f.manager.cancel(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EntitlementError::NoActiveSubscription(_)));
    }

    #[tokio::test]
    async fn reactivate_requires_cancelled_subscription() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let pro = paid_plan(&f.plans, "Pro").await;
        f.manager.upgrade(user_id, pro).await.unwrap();

        let err = f.manager.reactivate(user_id).await.unwrap_err();
        assert!(matches!(err, EntitlementError::InvalidState(_)));

        f.manager.cancel(user_id).await.unwrap();
        let reactivated = f.manager.reactivate(user_id).await.unwrap();
        assert_eq!(reactivated.status(), SubscriptionStatus::Active);
        assert_eq!(reactivated.cancelled_at, None);
    }

    #[tokio::test]
    async fn upgrade_to_inactive_plan_is_not_found() {
        let f = fixture();
        let mut input = CreatePlan::free();
        input.name = "Retired".to_string();
        input.is_active = false;
        let retired = f.plans.create(input).await.unwrap();

        let err = f
            .manager
            .upgrade(Uuid::new_v4(), retired.plan_id)
            .await
            .unwrap_err();
        assert!(matches!(err, EntitlementError::PlanNotFound(_)));
    }

    #[tokio::test]
    async fn suspended_subscription_cannot_be_upgraded_until_resumed() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let pro = paid_plan(&f.plans, "Pro").await;
        f.manager.suspend(user_id).await.unwrap();

        let err = f.manager.upgrade(user_id, pro).await.unwrap_err();
        assert!(matches!(err, EntitlementError::InvalidState(_)));

        let resumed = f.manager.resume(user_id).await.unwrap();
        assert_eq!(resumed.status(), SubscriptionStatus::Active);
        assert!(f.manager.upgrade(user_id, pro).await.is_ok());
    }

    #[tokio::test]
    async fn suspension_carries_into_next_period() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let suspended = f.manager.suspend(user_id).await.unwrap();

        let later = Utc::now() + Duration::days(PERIOD_DAYS + 1);
        let next = f.manager.get_or_create_at(user_id, later).await.unwrap();
        assert_ne!(next.subscription_id, suspended.subscription_id);
        assert_eq!(next.status(), SubscriptionStatus::Suspended);
        assert_eq!(f.manager.reconcile_lapsed(later, 10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lapsed_suspension_can_still_be_resumed() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let pro = paid_plan(&f.plans, "Pro").await;
        let old = lapsed_row(user_id, pro, SubscriptionStatus::Suspended);
        f.store.insert_subscription(old.clone()).await;

        assert_eq!(f.manager.reconcile_lapsed(Utc::now(), 10).await.unwrap(), 0);

        let resumed = f.manager.resume(user_id).await.unwrap();
        let free = f.plans.ensure_free_plan().await.unwrap();
        assert_ne!(resumed.subscription_id, old.subscription_id);
        assert_eq!(resumed.status(), SubscriptionStatus::Active);
        assert_eq!(resumed.plan_id, free.plan_id);
    }

    #[tokio::test]
    async fn resume_without_subscription_is_not_found() {
        let f = fixture();
        let err = f.manager.resume(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EntitlementError::NoActiveSubscription(_)));
    }

    #[tokio::test]
    async fn reconcile_expires_lapsed_rows() {
        let f = fixture();
        let pro = paid_plan(&f.plans, "Pro").await;
        let users: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for user_id in &users {
            f.store
                .insert_subscription(lapsed_row(*user_id, pro, SubscriptionStatus::Active))
                .await;
        }

        let rolled = f.manager.reconcile_lapsed(Utc::now(), 10).await.unwrap();
        assert_eq!(rolled, 3);
        assert_eq!(f.manager.reconcile_lapsed(Utc::now(), 10).await.unwrap(), 0);

        let free = f.plans.ensure_free_plan().await.unwrap();
        for user_id in users {
            let current = f
                .store
                .find_current_subscription(user_id, Utc::now())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(current.plan_id, free.plan_id);
        }
    }
}

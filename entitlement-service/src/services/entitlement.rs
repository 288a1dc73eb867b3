//! Entitlement engine: decides whether a listing may be created and commits usage.
//!
//! Every listing draws from the plan's shared monthly pool (`max_listings`).
//! Featured and vehicle listings also carry their own sub-limits, which are
//! reported but not enforced while the pool has room.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    EntitlementDecision, ListingType, ListingUsage, MonthKey, PlanCeilings, PricingKey,
    SubscriptionStatus, UsageReport, UserSubscription,
};
use crate::services::error::EntitlementError;
use crate::services::metrics::{
    record_degraded_allowance, record_entitlement_decision, record_listing_recorded,
    record_sublimit_override,
};
use crate::services::pricing::PricingProvider;
use crate::services::store::EntitlementStore;
use crate::services::subscriptions::SubscriptionManager;
use crate::services::usage::UsageLedger;

#[derive(Clone)]
pub struct EntitlementEngine {
    store: Arc<dyn EntitlementStore>,
    subscriptions: SubscriptionManager,
    usage: UsageLedger,
    pricing: Arc<dyn PricingProvider>,
}

impl EntitlementEngine {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        subscriptions: SubscriptionManager,
        usage: UsageLedger,
        pricing: Arc<dyn PricingProvider>,
    ) -> Self {
        Self {
            store,
            subscriptions,
            usage,
            pricing,
        }
    }

    /// Decide whether `user_id` may create a listing of `listing_type` now.
    ///
    /// Store failures never block listing creation: the check degrades to
    /// `Allowed` and the event is logged and counted.
    pub async fn check_entitlement(
        &self,
        user_id: Uuid,
        listing_type: ListingType,
    ) -> EntitlementDecision {
        self.check_entitlement_at(user_id, listing_type, Utc::now())
            .await
    }

    #[instrument(skip(self), fields(user_id = %user_id, listing_type = %listing_type))]
    pub async fn check_entitlement_at(
        &self,
        user_id: Uuid,
        listing_type: ListingType,
        now: DateTime<Utc>,
    ) -> EntitlementDecision {
        let decision = match self.evaluate(user_id, listing_type, now).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "Entitlement check degraded, allowing listing");
                record_degraded_allowance(listing_type.as_str());
                EntitlementDecision::Allowed
            }
        };

        record_entitlement_decision(listing_type.as_str(), decision.as_str());
        decision
    }

    async fn evaluate(
        &self,
        user_id: Uuid,
        listing_type: ListingType,
        now: DateTime<Utc>,
    ) -> Result<EntitlementDecision, EntitlementError> {
        let subscription = self.subscriptions.get_or_create_at(user_id, now).await?;
        if subscription.status() == SubscriptionStatus::Suspended {
            return Ok(EntitlementDecision::Denied {
                reason: "Subscription is suspended".to_string(),
            });
        }

        let (_, ceilings) = self.ceilings_for(&subscription).await?;
        let usage = self.usage.get(user_id, &MonthKey::from_datetime(now)).await?;

        if ceilings.listings.has_room(usage.free_listings_used) {
            self.note_sublimit(listing_type, &ceilings, &usage);
            return Ok(EntitlementDecision::Allowed);
        }

        let amount = self.pricing.price(PricingKey::AdditionalListingPrice).await;
        Ok(EntitlementDecision::AllowedWithCharge {
            amount,
            reason: format!("Monthly listing limit of {} reached", ceilings.listings),
        })
    }

    /// Pool has room but the modifier's own allowance is used up. Allowed anyway.
    fn note_sublimit(
        &self,
        listing_type: ListingType,
        ceilings: &PlanCeilings,
        usage: &ListingUsage,
    ) {
        let (limit, used) = match listing_type {
            ListingType::Free => return,
            ListingType::Featured => (ceilings.featured, usage.featured_listings_used),
            ListingType::Vehicle => (ceilings.vehicle, usage.vehicle_listings_used),
        };
        if !limit.has_room(used) {
            info!(
                limit = %limit,
                used = used,
                "Listing allowed from shared pool past its sub-limit"
            );
            record_sublimit_override(listing_type.as_str());
        }
    }

    /// Plan id and ceilings of a current subscription. Lapsed rows were
    /// already rolled over by `get_or_create_at`.
    async fn ceilings_for(
        &self,
        subscription: &UserSubscription,
    ) -> Result<(Uuid, PlanCeilings), EntitlementError> {
        let plan_id = subscription.plan_id;
        let plan = self.store.get_plan(plan_id).await?;
        if plan.is_none() {
            warn!(plan_id = %plan_id, "Subscribed plan missing, applying default ceilings");
        }
        Ok((plan_id, PlanCeilings::for_plan(plan.as_ref())))
    }

    /// Commit one created listing to this month's ledger.
    #[instrument(skip(self), fields(user_id = %user_id, listing_type = %listing_type))]
    pub async fn record_listing_created(
        &self,
        user_id: Uuid,
        listing_type: ListingType,
    ) -> Result<ListingUsage, EntitlementError> {
        let usage = self
            .usage
            .increment(user_id, &MonthKey::current(), listing_type)
            .await?;
        record_listing_recorded(listing_type.as_str());
        Ok(usage)
    }

    /// Usage for `month` (default: the current month) next to the user's ceilings.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_usage(
        &self,
        user_id: Uuid,
        month: Option<MonthKey>,
    ) -> Result<UsageReport, EntitlementError> {
        let now = Utc::now();
        let month = month.unwrap_or_else(|| MonthKey::from_datetime(now));
        let subscription = self.subscriptions.get_or_create_at(user_id, now).await?;
        let (plan_id, ceilings) = self.ceilings_for(&subscription).await?;
        let usage = self.usage.get(user_id, &month).await?;

        Ok(UsageReport {
            plan_id,
            ceilings,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::PlanRegistry;
    use crate::models::{CreatePlan, QuotaLimit, UpdatePlan, UNLIMITED};
    use crate::services::memory::InMemoryStore;
    use crate::services::pricing::StaticPricing;
    use rust_decimal::Decimal;

    struct Fixture {
        store: Arc<InMemoryStore>,
        plans: PlanRegistry,
        subscriptions: SubscriptionManager,
        engine: EntitlementEngine,
    }

    fn fixture_with_pricing(pricing: StaticPricing) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let plans = PlanRegistry::new(store.clone());
        let subscriptions = SubscriptionManager::new(store.clone(), plans.clone());
        let engine = EntitlementEngine::new(
            store.clone(),
            subscriptions.clone(),
            UsageLedger::new(store.clone()),
            Arc::new(pricing),
        );
        Fixture {
            store,
            plans,
            subscriptions,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_pricing(StaticPricing::default())
    }

    async fn use_listings(f: &Fixture, user_id: Uuid, count: usize) {
        for _ in 0..count {
            f.engine
                .record_listing_created(user_id, ListingType::Free)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn fresh_user_featured_listing_is_allowed() {
        let f = fixture();
        let decision = f
            .engine
            .check_entitlement(Uuid::new_v4(), ListingType::Featured)
            .await;
        assert_eq!(decision, EntitlementDecision::Allowed);
    }

    #[tokio::test]
    async fn exhausted_pool_requires_payment() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        use_listings(&f, user_id, 5).await;

        let decision = f.engine.check_entitlement(user_id, ListingType::Free).await;
        let summary = decision.summary();
        assert!(!summary.allowed);
        assert!(summary.requires_payment);
        assert_eq!(summary.additional_cost, Some(Decimal::new(500, 2)));
    }

    #[tokio::test]
    async fn charge_uses_injected_price() {
        let pricing = StaticPricing::default()
            .with_price(PricingKey::AdditionalListingPrice, Decimal::new(25, 1));
        let f = fixture_with_pricing(pricing);
        let user_id = Uuid::new_v4();
        use_listings(&f, user_id, 5).await;

        match f.engine.check_entitlement(user_id, ListingType::Vehicle).await {
            EntitlementDecision::AllowedWithCharge { amount, .. } => {
                assert_eq!(amount, Decimal::new(25, 1))
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unlimited_pool_never_charges() {
        let f = fixture();
        let free = f.plans.ensure_free_plan().await.unwrap();
        f.plans
            .update(
                free.plan_id,
                UpdatePlan {
                    max_listings: Some(UNLIMITED),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let user_id = Uuid::new_v4();
        use_listings(&f, user_id, 40).await;

        let decision = f.engine.check_entitlement(user_id, ListingType::Free).await;
        assert_eq!(decision, EntitlementDecision::Allowed);
    }

    #[tokio::test]
    async fn modifier_sublimit_does_not_block_while_pool_has_room() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        // Free plan allows 0 vehicle listings.
        for listing_type in [ListingType::Free, ListingType::Vehicle] {
            assert_eq!(
                f.engine.check_entitlement(user_id, listing_type).await,
                EntitlementDecision::Allowed
            );
        }
    }

    #[tokio::test]
    async fn suspended_subscription_is_denied() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        f.subscriptions.suspend(user_id).await.unwrap();

        let decision = f.engine.check_entitlement(user_id, ListingType::Free).await;
        assert!(matches!(decision, EntitlementDecision::Denied { .. }));
    }

    #[tokio::test]
    async fn suspension_outlives_billing_period() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        f.subscriptions.suspend(user_id).await.unwrap();

        let later = Utc::now() + chrono::Duration::days(31);
        let decision = f
            .engine
            .check_entitlement_at(user_id, ListingType::Free, later)
            .await;
        assert!(matches!(decision, EntitlementDecision::Denied { .. }));
    }

    #[tokio::test]
    async fn lapsed_downgrade_applies_target_ceilings() {
        let f = fixture();
        let mut input = CreatePlan::free();
        input.name = "Pro".to_string();
        input.max_listings = 50;
        let pro = f.plans.create(input).await.unwrap();
        let mut input = CreatePlan::free();
        input.name = "Basic".to_string();
        input.max_listings = 15;
        let basic = f.plans.create(input).await.unwrap();

        let user_id = Uuid::new_v4();
        f.subscriptions.upgrade(user_id, pro.plan_id).await.unwrap();
        f.subscriptions
            .downgrade(user_id, basic.plan_id)
            .await
            .unwrap();

        let later = Utc::now() + chrono::Duration::days(31);
        let rolled = f
            .subscriptions
            .get_or_create_at(user_id, later)
            .await
            .unwrap();
        assert_eq!(rolled.plan_id, basic.plan_id);
        let (plan_id, ceilings) = f.engine.ceilings_for(&rolled).await.unwrap();
        assert_eq!(plan_id, basic.plan_id);
        assert_eq!(ceilings.listings, QuotaLimit::Limited(15));
    }

    #[tokio::test]
    async fn store_outage_fails_open() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        use_listings(&f, user_id, 5).await;
        f.store.set_unavailable(true);

        let decision = f.engine.check_entitlement(user_id, ListingType::Free).await;
        assert_eq!(decision, EntitlementDecision::Allowed);

        let err = f
            .engine
            .record_listing_created(user_id, ListingType::Free)
            .await
            .unwrap_err();
        assert!(matches!(err, EntitlementError::Store(_)));
    }

    #[tokio::test]
    async fn deleted_plan_falls_back_to_default_ceilings() {
        let f = fixture();
        let mut input = CreatePlan::free();
        input.name = "Dealer".to_string();
        input.max_listings = 100;
        let dealer = f.plans.create(input).await.unwrap();
        let user_id = Uuid::new_v4();
        f.subscriptions.upgrade(user_id, dealer.plan_id).await.unwrap();
        f.plans.delete(dealer.plan_id).await.unwrap();

        let report = f.engine.get_usage(user_id, None).await.unwrap();
        assert_eq!(report.plan_id, dealer.plan_id);
        assert_eq!(report.ceilings.listings, QuotaLimit::Limited(5));

        use_listings(&f, user_id, 5).await;
        let decision = f.engine.check_entitlement(user_id, ListingType::Free).await;
        assert!(decision.summary().requires_payment);
    }

    #[tokio::test]
    async fn featured_listing_counts_against_pool_and_modifier() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let usage = f
            .engine
            .record_listing_created(user_id, ListingType::Featured)
            .await
            .unwrap();
        assert_eq!(usage.free_listings_used, 1);
        assert_eq!(usage.featured_listings_used, 1);
        assert_eq!(usage.vehicle_listings_used, 0);
    }
}

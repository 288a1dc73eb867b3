//! Subscription plan registry.

use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::models::{CreatePlan, SubscriptionPlan, UpdatePlan, FREE_PLAN_NAME};
use crate::services::error::EntitlementError;
use crate::services::metrics::record_plan_operation;
use crate::services::store::EntitlementStore;
use service_core::error::AppError;

#[derive(Clone)]
pub struct PlanRegistry {
    store: Arc<dyn EntitlementStore>,
}

/// Turn a store-level name clash into the domain error.
fn map_conflict(err: AppError, name: &str) -> EntitlementError {
    match err {
        AppError::Conflict(_) => EntitlementError::DuplicatePlanName(name.to_string()),
        other => EntitlementError::Store(other),
    }
}

fn ensure_prices_non_negative(
    monthly: Option<rust_decimal::Decimal>,
    yearly: Option<rust_decimal::Decimal>,
) -> Result<(), EntitlementError> {
    if monthly.is_some_and(|p| p.is_sign_negative()) || yearly.is_some_and(|p| p.is_sign_negative())
    {
        return Err(EntitlementError::InvalidInput(
            "Plan prices must not be negative".to_string(),
        ));
    }
    Ok(())
}

impl PlanRegistry {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self { store }
    }

    /// All plans, ordered by `sort_order` then name.
    pub async fn list(&self) -> Result<Vec<SubscriptionPlan>, EntitlementError> {
        Ok(self.store.list_plans(false).await?)
    }

    pub async fn list_active(&self) -> Result<Vec<SubscriptionPlan>, EntitlementError> {
        Ok(self.store.list_plans(true).await?)
    }

    pub async fn get(&self, plan_id: Uuid) -> Result<SubscriptionPlan, EntitlementError> {
        self.store
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| EntitlementError::PlanNotFound(plan_id.to_string()))
    }

    /// Fetch a plan a subscription may be moved onto.
    pub async fn get_subscribable(
        &self,
        plan_id: Uuid,
    ) -> Result<SubscriptionPlan, EntitlementError> {
        let plan = self.get(plan_id).await?;
        if !plan.is_active {
            return Err(EntitlementError::PlanNotFound(plan_id.to_string()));
        }
        Ok(plan)
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create(&self, input: CreatePlan) -> Result<SubscriptionPlan, EntitlementError> {
        input.validate()?;
        ensure_prices_non_negative(Some(input.price_monthly), input.price_yearly)?;

        if self.store.get_plan_by_name(&input.name).await?.is_some() {
            return Err(EntitlementError::DuplicatePlanName(input.name));
        }

        let plan = self
            .store
            .create_plan(&input)
            .await
            .map_err(|e| map_conflict(e, &input.name))?;

        record_plan_operation("created");
        info!(plan_id = %plan.plan_id, "Plan registered");
        Ok(plan)
    }

    #[instrument(skip(self, input), fields(plan_id = %plan_id))]
    pub async fn update(
        &self,
        plan_id: Uuid,
        input: UpdatePlan,
    ) -> Result<SubscriptionPlan, EntitlementError> {
        input.validate()?;
        ensure_prices_non_negative(input.price_monthly, input.price_yearly)?;

        let existing = self.get(plan_id).await?;
        if existing.is_free_plan() {
            let renamed = input.name.as_deref().is_some_and(|n| n != FREE_PLAN_NAME);
            let deactivated = input.is_active == Some(false);
            if renamed || deactivated {
                return Err(EntitlementError::ProtectedPlan(existing.name));
            }
        }

        if let Some(name) = &input.name {
            if let Some(other) = self.store.get_plan_by_name(name).await? {
                if other.plan_id != plan_id {
                    return Err(EntitlementError::DuplicatePlanName(name.clone()));
                }
            }
        }

        let name = input.name.clone().unwrap_or(existing.name);
        let plan = self
            .store
            .update_plan(plan_id, &input)
            .await
            .map_err(|e| map_conflict(e, &name))?
            .ok_or_else(|| EntitlementError::PlanNotFound(plan_id.to_string()))?;

        record_plan_operation("updated");
        Ok(plan)
    }

    /// Remove a plan. Subscriptions still pointing at it fall back to default
    /// ceilings at check time.
    #[instrument(skip(self), fields(plan_id = %plan_id))]
    pub async fn delete(&self, plan_id: Uuid) -> Result<(), EntitlementError> {
        let plan = self.get(plan_id).await?;
        if plan.is_free_plan() {
            warn!("Refusing to delete the Free plan");
            return Err(EntitlementError::ProtectedPlan(plan.name));
        }

        if !self.store.delete_plan(plan_id).await? {
            return Err(EntitlementError::PlanNotFound(plan_id.to_string()));
        }

        record_plan_operation("deleted");
        info!(name = %plan.name, "Plan deleted");
        Ok(())
    }

    /// Return the Free plan, creating it if it is missing.
    #[instrument(skip(self))]
    pub async fn ensure_free_plan(&self) -> Result<SubscriptionPlan, EntitlementError> {
        if let Some(plan) = self.store.get_plan_by_name(FREE_PLAN_NAME).await? {
            return Ok(plan);
        }

        match self.store.create_plan(&CreatePlan::free()).await {
            Ok(plan) => {
                info!(plan_id = %plan.plan_id, "Free plan created");
                Ok(plan)
            }
            // Created concurrently by another caller.
            Err(AppError::Conflict(_)) => self
                .store
                .get_plan_by_name(FREE_PLAN_NAME)
                .await?
                .ok_or_else(|| EntitlementError::PlanNotFound(FREE_PLAN_NAME.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

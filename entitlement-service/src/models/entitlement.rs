//! Entitlement decision model.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::plan::{
    QuotaLimit, SubscriptionPlan, DEFAULT_MAX_FEATURED_LISTINGS, DEFAULT_MAX_LISTINGS,
    DEFAULT_MAX_VEHICLE_LISTINGS,
};
use super::usage::ListingUsage;

/// Outcome of an entitlement check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EntitlementDecision {
    /// Create the listing at no charge.
    Allowed,
    /// The monthly pool is used up; the listing may be created once `amount` is paid.
    AllowedWithCharge { amount: Decimal, reason: String },
    /// The listing must not be created.
    Denied { reason: String },
}

impl EntitlementDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntitlementDecision::Allowed => "allowed",
            EntitlementDecision::AllowedWithCharge { .. } => "allowed_with_charge",
            EntitlementDecision::Denied { .. } => "denied",
        }
    }

    pub fn summary(&self) -> EntitlementSummary {
        EntitlementSummary::from(self)
    }
}

/// Flat view of a decision for API callers.
///
/// A chargeable decision reports `allowed = false` until payment has been
/// collected, together with `requires_payment = true` and the cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementSummary {
    pub allowed: bool,
    pub requires_payment: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_cost: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&EntitlementDecision> for EntitlementSummary {
    fn from(decision: &EntitlementDecision) -> Self {
        match decision {
            EntitlementDecision::Allowed => EntitlementSummary {
                allowed: true,
                requires_payment: false,
                additional_cost: None,
                reason: None,
            },
            EntitlementDecision::AllowedWithCharge { amount, reason } => EntitlementSummary {
                allowed: false,
                requires_payment: true,
                additional_cost: Some(*amount),
                reason: Some(reason.clone()),
            },
            EntitlementDecision::Denied { reason } => EntitlementSummary {
                allowed: false,
                requires_payment: false,
                additional_cost: None,
                reason: Some(reason.clone()),
            },
        }
    }
}

/// Ceilings in force for a user during a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCeilings {
    pub listings: QuotaLimit,
    pub featured: QuotaLimit,
    pub vehicle: QuotaLimit,
}

impl PlanCeilings {
    /// Ceilings of `plan`, or the Free defaults when the plan row is gone.
    pub fn for_plan(plan: Option<&SubscriptionPlan>) -> Self {
        match plan {
            Some(plan) => Self {
                listings: plan.listing_limit(),
                featured: plan.featured_limit(),
                vehicle: plan.vehicle_limit(),
            },
            None => Self {
                listings: QuotaLimit::from_ceiling(DEFAULT_MAX_LISTINGS),
                featured: QuotaLimit::from_ceiling(DEFAULT_MAX_FEATURED_LISTINGS),
                vehicle: QuotaLimit::from_ceiling(DEFAULT_MAX_VEHICLE_LISTINGS),
            },
        }
    }
}

/// A user's consumption for one month next to the ceilings that apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub plan_id: Uuid,
    pub ceilings: PlanCeilings,
    pub usage: ListingUsage,
}

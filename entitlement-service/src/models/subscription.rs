//! User subscription model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Length of a billing period.
pub const PERIOD_DAYS: i64 = 30;

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
    Suspended,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Suspended => "suspended",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "cancelled" => SubscriptionStatus::Cancelled,
            "expired" => SubscriptionStatus::Expired,
            "suspended" => SubscriptionStatus::Suspended,
            _ => SubscriptionStatus::Active,
        }
    }

    pub fn to_proto(&self) -> i32 {
        match self {
            SubscriptionStatus::Active => 1,
            SubscriptionStatus::Cancelled => 2,
            SubscriptionStatus::Expired => 3,
            SubscriptionStatus::Suspended => 4,
        }
    }

    /// Statuses that still hold a billing period open.
    pub fn is_current(&self) -> bool {
        !matches!(self, SubscriptionStatus::Expired)
    }
}

/// User subscription.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserSubscription {
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub pending_plan_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl UserSubscription {
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_string(&self.status)
    }

    /// True once the billing window has closed.
    pub fn has_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.current_period_end < now
    }

    /// A row that still governs entitlements: not expired and inside its window.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.status().is_current() && !self.has_lapsed(now)
    }
}

/// Input for opening a subscription period.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub status: SubscriptionStatus,
}

impl NewSubscription {
    /// A fresh, active 30-day window starting at `now`.
    pub fn starting_at(user_id: Uuid, plan_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            plan_id,
            current_period_start: now,
            current_period_end: now + Duration::days(PERIOD_DAYS),
            status: SubscriptionStatus::Active,
        }
    }

    /// Open the window as suspended instead.
    pub fn suspended(mut self) -> Self {
        self.status = SubscriptionStatus::Suspended;
        self
    }
}

/// Which plan's ceilings apply to a subscription at a point in time.
///
/// While the period is open the subscribed plan applies, cancelled or not.
/// After it lapses the scheduled downgrade target applies if one was recorded,
/// otherwise the Free plan.
pub fn effective_plan_id(
    subscription: &UserSubscription,
    free_plan_id: Uuid,
    now: DateTime<Utc>,
) -> Uuid {
    if !subscription.has_lapsed(now) && subscription.status() != SubscriptionStatus::Expired {
        return subscription.plan_id;
    }
    subscription.pending_plan_id.unwrap_or(free_plan_id)
}

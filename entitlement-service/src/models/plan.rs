//! Subscription plan model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Name of the fallback plan every user without an explicit subscription is on.
pub const FREE_PLAN_NAME: &str = "Free";

/// Ceiling value meaning "no limit".
pub const UNLIMITED: i32 = -1;

/// Listing ceilings applied when a subscription points at a plan that no longer exists.
pub const DEFAULT_MAX_LISTINGS: i32 = 5;
pub const DEFAULT_MAX_FEATURED_LISTINGS: i32 = 0;
pub const DEFAULT_MAX_VEHICLE_LISTINGS: i32 = 0;

/// A monthly quota ceiling as stored on a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaLimit {
    Unlimited,
    Limited(i32),
}

impl QuotaLimit {
    /// Interpret a stored ceiling. Any negative value is treated as unlimited.
    pub fn from_ceiling(value: i32) -> Self {
        if value < 0 {
            QuotaLimit::Unlimited
        } else {
            QuotaLimit::Limited(value)
        }
    }

    /// Whether one more unit fits given `used` units already consumed.
    pub fn has_room(&self, used: i32) -> bool {
        match self {
            QuotaLimit::Unlimited => true,
            QuotaLimit::Limited(max) => used < *max,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, QuotaLimit::Unlimited)
    }

    /// Stored representation (`-1` for unlimited).
    pub fn as_ceiling(&self) -> i32 {
        match self {
            QuotaLimit::Unlimited => UNLIMITED,
            QuotaLimit::Limited(max) => *max,
        }
    }
}

impl std::fmt::Display for QuotaLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaLimit::Unlimited => write!(f, "unlimited"),
            QuotaLimit::Limited(max) => write!(f, "{}", max),
        }
    }
}

/// Subscription plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionPlan {
    pub plan_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price_monthly: Decimal,
    pub price_yearly: Option<Decimal>,
    pub currency: String,
    pub max_listings: i32,
    pub max_featured_listings: i32,
    pub max_vehicle_listings: i32,
    pub features: Json<Vec<String>>,
    pub is_active: bool,
    pub sort_order: i32,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl SubscriptionPlan {
    pub fn is_free_plan(&self) -> bool {
        self.name == FREE_PLAN_NAME
    }

    pub fn listing_limit(&self) -> QuotaLimit {
        QuotaLimit::from_ceiling(self.max_listings)
    }

    pub fn featured_limit(&self) -> QuotaLimit {
        QuotaLimit::from_ceiling(self.max_featured_listings)
    }

    pub fn vehicle_limit(&self) -> QuotaLimit {
        QuotaLimit::from_ceiling(self.max_vehicle_listings)
    }
}

/// Input for creating a plan.
#[derive(Debug, Clone, Validate)]
pub struct CreatePlan {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub description: Option<String>,
    pub price_monthly: Decimal,
    pub price_yearly: Option<Decimal>,
    #[validate(length(equal = 3))]
    pub currency: String,
    #[validate(range(min = -1))]
    pub max_listings: i32,
    #[validate(range(min = -1))]
    pub max_featured_listings: i32,
    #[validate(range(min = -1))]
    pub max_vehicle_listings: i32,
    pub features: Vec<String>,
    pub is_active: bool,
    pub sort_order: i32,
}

impl CreatePlan {
    /// The seed definition of the Free plan.
    pub fn free() -> Self {
        Self {
            name: FREE_PLAN_NAME.to_string(),
            description: Some("Basic listings at no cost".to_string()),
            price_monthly: Decimal::ZERO,
            price_yearly: None,
            currency: "USD".to_string(),
            max_listings: DEFAULT_MAX_LISTINGS,
            max_featured_listings: DEFAULT_MAX_FEATURED_LISTINGS,
            max_vehicle_listings: DEFAULT_MAX_VEHICLE_LISTINGS,
            features: vec![format!("{} listings per month", DEFAULT_MAX_LISTINGS)],
            is_active: true,
            sort_order: 0,
        }
    }
}

/// Input for updating a plan. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Validate)]
pub struct UpdatePlan {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_monthly: Option<Decimal>,
    pub price_yearly: Option<Decimal>,
    #[validate(range(min = -1))]
    pub max_listings: Option<i32>,
    #[validate(range(min = -1))]
    pub max_featured_listings: Option<i32>,
    #[validate(range(min = -1))]
    pub max_vehicle_listings: Option<i32>,
    pub features: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub sort_order: Option<i32>,
}

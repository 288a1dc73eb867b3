//! Payment records returned by the external payment processor.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment type used when a listing exceeds the monthly pool.
pub const ADDITIONAL_LISTING_PAYMENT: &str = "additional_listing";

/// Payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

/// Charge request handed to the payment processor.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_type: String,
    pub metadata: Option<serde_json::Value>,
}

/// Payment as reported back by the processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_type: String,
    pub status: PaymentStatus,
    pub metadata: Option<serde_json::Value>,
}

impl Payment {
    pub fn is_settled(&self) -> bool {
        self.status == PaymentStatus::Succeeded
    }
}

//! Listing creation inputs and results.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payment::Payment;
use super::usage::ListingType;

/// Raw image attached to a listing draft, uploaded before the listing is saved.
#[derive(Debug, Clone)]
pub struct ListingImage {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A listing a seller wants to publish.
#[derive(Debug, Clone)]
pub struct ListingDraft {
    pub user_id: Uuid,
    pub listing_type: ListingType,
    pub title: String,
    pub description: String,
    pub price: Option<Decimal>,
    pub images: Vec<ListingImage>,
    pub metadata: Option<serde_json::Value>,
}

/// Listing payload handed to the listing store once images are uploaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishListing {
    pub user_id: Uuid,
    pub listing_type: ListingType,
    pub title: String,
    pub description: String,
    pub price: Option<Decimal>,
    pub image_urls: Vec<String>,
    pub payment_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
}

/// Result of a successful listing creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedListing {
    pub listing_id: Uuid,
    pub listing_type: ListingType,
    pub image_urls: Vec<String>,
    pub payment: Option<Payment>,
}

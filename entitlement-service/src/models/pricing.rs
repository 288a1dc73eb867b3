//! Pricing configuration model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

/// Well-known pricing keys and their hard-coded fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingKey {
    AdditionalListingPrice,
    AdditionalFeaturedPrice,
    AdditionalVehiclePrice,
}

impl PricingKey {
    pub const ALL: [PricingKey; 3] = [
        PricingKey::AdditionalListingPrice,
        PricingKey::AdditionalFeaturedPrice,
        PricingKey::AdditionalVehiclePrice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PricingKey::AdditionalListingPrice => "additional_listing_price",
            PricingKey::AdditionalFeaturedPrice => "additional_featured_price",
            PricingKey::AdditionalVehiclePrice => "additional_vehicle_price",
        }
    }

    pub fn from_key(s: &str) -> Option<Self> {
        PricingKey::ALL.into_iter().find(|k| k.as_str() == s)
    }

    pub fn default_value(&self) -> Decimal {
        match self {
            PricingKey::AdditionalListingPrice => Decimal::new(500, 2),
            PricingKey::AdditionalFeaturedPrice => Decimal::new(299, 2),
            PricingKey::AdditionalVehiclePrice => Decimal::new(499, 2),
        }
    }
}

/// A row of the `pricing_config` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PricingConfigEntry {
    pub config_key: String,
    pub config_value: serde_json::Value,
    pub is_active: bool,
    pub updated_utc: DateTime<Utc>,
}

impl PricingConfigEntry {
    /// Read the value as a price.
    ///
    /// Accepts a JSON number, a numeric string, or an object carrying an
    /// `amount` field.
    pub fn decimal_value(&self) -> Option<Decimal> {
        json_to_decimal(&self.config_value)
    }
}

fn json_to_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        serde_json::Value::Object(map) => map.get("amount").and_then(json_to_decimal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(value: serde_json::Value) -> PricingConfigEntry {
        PricingConfigEntry {
            config_key: "additional_listing_price".to_string(),
            config_value: value,
            is_active: true,
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn defaults_match_published_prices() {
        assert_eq!(
            PricingKey::AdditionalListingPrice.default_value().to_string(),
            "5.00"
        );
        assert_eq!(
            PricingKey::AdditionalFeaturedPrice.default_value().to_string(),
            "2.99"
        );
        assert_eq!(
            PricingKey::AdditionalVehiclePrice.default_value().to_string(),
            "4.99"
        );
    }

    #[test]
    fn decimal_value_reads_numbers_strings_and_objects() {
        assert_eq!(entry(json!(7.5)).decimal_value(), Some(Decimal::new(75, 1)));
        assert_eq!(entry(json!("3.25")).decimal_value(), Some(Decimal::new(325, 2)));
        assert_eq!(
            entry(json!({"amount": "6.00", "currency": "USD"})).decimal_value(),
            Some(Decimal::new(600, 2))
        );
        assert_eq!(entry(json!([1, 2])).decimal_value(), None);
    }

    #[test]
    fn from_key_round_trips_known_keys() {
        for key in PricingKey::ALL {
            assert_eq!(PricingKey::from_key(key.as_str()), Some(key));
        }
        assert_eq!(PricingKey::from_key("listing_boost"), None);
    }
}

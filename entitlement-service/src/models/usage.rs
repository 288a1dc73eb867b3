//! Listing usage ledger model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Listing type requested by a seller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingType {
    Free,
    Featured,
    Vehicle,
}

impl ListingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingType::Free => "free",
            ListingType::Featured => "featured",
            ListingType::Vehicle => "vehicle",
        }
    }

    pub fn to_proto(&self) -> i32 {
        match self {
            ListingType::Free => 1,
            ListingType::Featured => 2,
            ListingType::Vehicle => 3,
        }
    }

    pub fn from_proto(value: i32) -> Option<Self> {
        match value {
            1 => Some(ListingType::Free),
            2 => Some(ListingType::Featured),
            3 => Some(ListingType::Vehicle),
            _ => None,
        }
    }

    /// Ledger increments for one listing of this type: (free, featured, vehicle).
    ///
    /// Every listing consumes one unit of the shared pool; modifiers also
    /// consume their own counter.
    pub fn ledger_increments(&self) -> (i32, i32, i32) {
        match self {
            ListingType::Free => (1, 0, 0),
            ListingType::Featured => (1, 1, 0),
            ListingType::Vehicle => (1, 0, 1),
        }
    }
}

impl fmt::Display for ListingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" | "basic" => Ok(ListingType::Free),
            "featured" => Ok(ListingType::Featured),
            "vehicle" => Ok(ListingType::Vehicle),
            other => Err(format!("Unknown listing type: {}", other)),
        }
    }
}

/// Calendar-month ledger partition key in `YYYY-MM` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthKey(String);

impl MonthKey {
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        MonthKey(at.format("%Y-%m").to_string())
    }

    pub fn current() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d")
            .map_err(|_| format!("Invalid month key: {}", s))?;
        if s.len() != 7 {
            return Err(format!("Invalid month key: {}", s));
        }
        Ok(MonthKey(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-user, per-month listing counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ListingUsage {
    pub user_id: Uuid,
    pub month_year: String,
    pub free_listings_used: i32,
    pub featured_listings_used: i32,
    pub vehicle_listings_used: i32,
}

impl ListingUsage {
    /// Zero counters for a month with no recorded listings.
    pub fn empty(user_id: Uuid, month: &MonthKey) -> Self {
        Self {
            user_id,
            month_year: month.to_string(),
            free_listings_used: 0,
            featured_listings_used: 0,
            vehicle_listings_used: 0,
        }
    }

    /// Apply one listing of the given type.
    pub fn apply(&mut self, listing_type: ListingType) {
        let (free, featured, vehicle) = listing_type.ledger_increments();
        self.free_listings_used += free;
        self.featured_listings_used += featured;
        self.vehicle_listings_used += vehicle;
    }
}

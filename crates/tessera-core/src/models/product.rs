//! Customer product attachments
//!
//! A `FullCusProduct` is a customer's attachment to a catalog product. One
//! attachment may span several processor subscriptions when billing is
//! split (e.g. fixed fees on one, metered usage on another).

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{AppEnv, Customer, CustomerEntitlement, Entitlement, Price};

/// Lifecycle status of a customer product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CusProductStatus {
    #[default]
    Active,
    Expired,
    PastDue,
    Scheduled,
    Unknown,
}

impl fmt::Display for CusProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CusProductStatus::Active => write!(f, "active"),
            CusProductStatus::Expired => write!(f, "expired"),
            CusProductStatus::PastDue => write!(f, "past_due"),
            CusProductStatus::Scheduled => write!(f, "scheduled"),
            CusProductStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl CusProductStatus {
    /// Parse from string (case-insensitive); unrecognized values map to Unknown
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "active" => CusProductStatus::Active,
            "expired" => CusProductStatus::Expired,
            "past_due" => CusProductStatus::PastDue,
            "scheduled" => CusProductStatus::Scheduled,
            _ => CusProductStatus::Unknown,
        }
    }

    /// Statuses whose invoices still carry usage to settle
    pub fn billable() -> [CusProductStatus; 3] {
        [
            CusProductStatus::Active,
            CusProductStatus::Expired,
            CusProductStatus::PastDue,
        ]
    }
}

/// A customer's attachment to a catalog product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullCusProduct {
    pub id: String,

    pub internal_customer_id: String,

    /// Joined customer row
    pub customer: Customer,

    pub internal_product_id: String,

    pub product_id: String,

    /// Creation time as epoch milliseconds
    pub created_at: i64,

    pub status: CusProductStatus,

    /// Processor subscriptions billing this attachment
    #[serde(default)]
    pub subscription_ids: Vec<String>,

    /// Set when the whole product is scoped to one entity
    pub internal_entity_id: Option<String>,
}

impl FullCusProduct {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.created_at).single()
    }

    pub fn is_entity_scoped(&self) -> bool {
        self.internal_entity_id.is_some()
    }
}

/// Link between a catalog price and a customer product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerPrice {
    pub id: String,

    pub customer_product_id: String,

    /// Joined price row
    pub price: Price,
}

/// Catalog product with its prices and entitlements
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullProduct {
    pub internal_id: String,

    pub id: String,

    pub name: String,

    pub org_id: String,

    pub env: AppEnv,

    pub version: i32,

    #[serde(default)]
    pub prices: Vec<Price>,

    #[serde(default)]
    pub entitlements: Vec<Entitlement>,
}

/// Entitlements and prices of one customer product
#[derive(Debug, Clone, Default)]
pub struct CusProductLedger {
    pub customer_entitlements: Vec<CustomerEntitlement>,
    pub customer_prices: Vec<CustomerPrice>,
}

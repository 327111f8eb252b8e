//! Payment processor objects
//!
//! Read-only views of the processor's invoices and subscriptions, plus the
//! request shapes this service sends back (invoice items and meter events).
//! Timestamps are unix seconds, as the processor reports them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Why the processor generated an invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingReason {
    Manual,
    Subscription,
    SubscriptionCreate,
    SubscriptionCycle,
    SubscriptionThreshold,
    /// Plan change; settled through the migration path, not period-end usage
    SubscriptionUpdate,
    Upcoming,
    #[serde(other)]
    Other,
}

/// Invoice as delivered in the `invoice.created` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,

    /// Processor customer id
    #[serde(default)]
    pub customer: Option<String>,

    #[serde(default)]
    pub currency: String,

    pub period_start: i64,

    pub period_end: i64,

    pub created: i64,

    #[serde(default)]
    pub billing_reason: Option<BillingReason>,

    /// Subscription billed by this invoice
    #[serde(default)]
    pub subscription: Option<String>,

    #[serde(default)]
    pub status: Option<String>,
}

impl Invoice {
    pub fn is_subscription_update(&self) -> bool {
        self.billing_reason == Some(BillingReason::SubscriptionUpdate)
    }
}

/// Processor subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
    #[serde(other)]
    Unknown,
}

/// Metadata key listing the internal feature ids billed by a subscription
pub const USAGE_FEATURES_METADATA_KEY: &str = "usage_features";

/// Processor subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,

    pub current_period_start: i64,

    pub current_period_end: i64,

    #[serde(default)]
    pub trial_end: Option<i64>,

    #[serde(default)]
    pub status: SubscriptionStatus,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Subscription {
    /// Internal feature ids this subscription meters
    ///
    /// The metadata value is a JSON array of either plain ids or objects with
    /// an `internal_id` field. Malformed metadata yields an empty list.
    pub fn usage_features(&self) -> Vec<String> {
        let Some(raw) = self.metadata.get(USAGE_FEATURES_METADATA_KEY) else {
            return Vec::new();
        };

        let Ok(serde_json::Value::Array(items)) = serde_json::from_str(raw) else {
            return Vec::new();
        };

        items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(id) => Some(id),
                serde_json::Value::Object(obj) => obj
                    .get("internal_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                _ => None,
            })
            .collect()
    }

    pub fn bills_usage_for(&self, internal_feature_id: &str) -> bool {
        self.usage_features().iter().any(|f| f == internal_feature_id)
    }

    /// The first invoice after a trial starts exactly where the trial ended
    pub fn is_trial_conversion(&self) -> bool {
        self.trial_end == Some(self.current_period_start)
    }
}

/// Invoice line item to create on an open invoice
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceItemSpec {
    /// Processor customer id
    pub customer: String,

    pub invoice: String,

    pub currency: String,

    /// Amount in the currency's minor unit
    pub amount_minor: i64,

    pub description: String,

    pub period_start: i64,

    pub period_end: i64,

    pub metadata: BTreeMap<String, String>,
}

/// Invoice item created by the processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: String,
    #[serde(default)]
    pub invoice: Option<String>,
    pub amount: i64,
    pub currency: String,
}

/// Usage value submitted to a processor meter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterEventSpec {
    pub meter_id: String,

    /// Processor customer id
    pub customer: String,

    pub value: Decimal,

    /// Unix seconds the usage is attributed to
    pub timestamp: i64,
}

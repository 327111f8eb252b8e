//! Stripe wire types
//!
//! Only the fields this service reads are modeled; everything else in a
//! response is ignored.

use serde::{Deserialize, Serialize};
use tessera_core::models::Invoice;

/// Event type that drives usage reconciliation
pub const INVOICE_CREATED: &str = "invoice.created";

/// Error envelope returned on non-2xx responses
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayloadKey {
    pub event_payload_key: String,
}

/// Billing meter
#[derive(Debug, Clone, Deserialize)]
pub struct Meter {
    pub id: String,

    pub event_name: String,

    #[serde(default)]
    pub customer_mapping: Option<PayloadKey>,

    #[serde(default)]
    pub value_settings: Option<PayloadKey>,
}

impl Meter {
    /// Payload key carrying the customer id
    pub fn customer_key(&self) -> &str {
        self.customer_mapping
            .as_ref()
            .map(|m| m.event_payload_key.as_str())
            .unwrap_or("stripe_customer_id")
    }

    /// Payload key carrying the usage value
    pub fn value_key(&self) -> &str {
        self.value_settings
            .as_ref()
            .map(|v| v.event_payload_key.as_str())
            .unwrap_or("value")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeterEvent {
    #[serde(default)]
    pub identifier: Option<String>,
    pub event_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// Webhook event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeEvent {
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub livemode: bool,

    #[serde(default)]
    pub created: i64,

    pub data: EventData,
}

impl StripeEvent {
    pub fn is_invoice_created(&self) -> bool {
        self.event_type == INVOICE_CREATED
    }

    /// Decode the event object as an invoice
    pub fn invoice(&self) -> Result<Invoice, serde_json::Error> {
        Invoice::deserialize(&self.data.object)
    }
}

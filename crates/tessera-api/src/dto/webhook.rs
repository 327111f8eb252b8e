//! Webhook DTOs

use serde::{Deserialize, Serialize};
use tessera_core::{models::AppEnv, AppError};
use tessera_services::ReconcileOutcome;
use validator::{Validate, ValidationError};

/// Path parameters of `/webhooks/stripe/{org_id}/{env}`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WebhookPath {
    /// Organization the processor account belongs to
    #[validate(length(min = 1, max = 128))]
    pub org_id: String,

    /// `sandbox` or `live`
    #[validate(custom(function = "validate_env"))]
    pub env: String,
}

pub(crate) fn validate_env(env: &str) -> Result<(), ValidationError> {
    match AppEnv::from_str(env) {
        Some(_) => Ok(()),
        None => Err(ValidationError::new("invalid_env")),
    }
}

impl WebhookPath {
    /// Parsed environment
    pub fn app_env(&self) -> Result<AppEnv, AppError> {
        AppEnv::from_str(&self.env)
            .ok_or_else(|| AppError::Validation(format!("Unknown environment: {}", self.env)))
    }
}

/// Acknowledgement returned to the processor
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    /// Processor event id
    pub event_id: String,
    /// Processor event type
    pub event_type: String,
    /// Whether the event was dispatched to a handler
    pub handled: bool,
    /// Reconciliation summary for `invoice.created`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ReconcileOutcome>,
}

impl WebhookAck {
    /// Acknowledge an event type this service does not process
    pub fn ignored(event_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            handled: false,
            outcome: None,
        }
    }
}

//! Payment processor webhook handlers
//!
//! The processor redelivers any event answered with a non-2xx status, so
//! every hard failure surfaces as an `AppError` response and every event
//! this service does not process is acknowledged with 200.

use crate::dto::{ApiResponse, WebhookAck, WebhookPath};
use actix_web::{web, HttpResponse};
use std::sync::Arc;
use tessera_core::{traits::OrganizationRepository, AppError};
use tessera_services::{InvoiceCreatedHandler, ReconcileContext};
use tessera_stripe::StripeEvent;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

/// Shared state of the webhook routes
pub struct WebhookState {
    /// Organization lookup for the path's `org_id`
    pub organizations: Arc<dyn OrganizationRepository>,
    /// `invoice.created` reconciliation
    pub invoice_created: Arc<InvoiceCreatedHandler>,
}

/// Receive a Stripe event
///
/// POST /webhooks/stripe/{org_id}/{env}
#[instrument(skip(state, body), fields(org_id = %path.org_id, env = %path.env))]
pub async fn stripe_webhook(
    state: web::Data<WebhookState>,
    path: web::Path<WebhookPath>,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    path.validate().map_err(|e| {
        warn!("Webhook path validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;
    let env = path.app_env()?;

    let org = state
        .organizations
        .find_by_id(&path.org_id)
        .await?
        .ok_or_else(|| AppError::OrganizationNotFound(path.org_id.clone()))?;

    let event: StripeEvent = serde_json::from_slice(&body).map_err(|e| {
        warn!("Malformed webhook payload: {}", e);
        AppError::InvalidInput(format!("Malformed event: {}", e))
    })?;

    if !event.is_invoice_created() {
        debug!(event_type = %event.event_type, "Ignoring event");
        let ack = WebhookAck::ignored(event.id, event.event_type);
        return Ok(HttpResponse::Ok().json(ApiResponse::with_message(ack, "Event type not handled")));
    }

    let invoice = event.invoice().map_err(|e| {
        warn!(event_id = %event.id, "Malformed invoice in event: {}", e);
        AppError::InvalidInput(format!("Malformed invoice: {}", e))
    })?;

    info!(
        event_id = %event.id,
        invoice_id = %invoice.id,
        org_slug = %org.slug,
        "Received invoice.created"
    );

    let ctx = ReconcileContext::new(org, env, event.id.clone());
    let outcome = state.invoice_created.handle(&ctx, &invoice).await?;

    let ack = WebhookAck {
        event_id: event.id,
        event_type: event.event_type,
        handled: true,
        outcome: Some(outcome),
    };
    Ok(HttpResponse::Ok().json(ApiResponse::success(ack)))
}

/// Configure webhook routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/webhooks")
            .route("/stripe/{org_id}/{env}", web::post().to(stripe_webhook)),
    );
}

//! Per-run reconciliation context

use tessera_core::models::{AppEnv, Organization};
use tracing::Span;

/// Tenant, environment and tracing identity of one reconciliation run
///
/// Passed by reference through every stage so log lines from the reporter,
/// the reset engine and the deletion handler share one span.
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    pub org: Organization,
    pub env: AppEnv,
    /// Processor event id, or a job id for batch runs
    pub correlation_id: String,
    pub span: Span,
}

impl ReconcileContext {
    pub fn new(org: Organization, env: AppEnv, correlation_id: impl Into<String>) -> Self {
        let correlation_id = correlation_id.into();
        let span = tracing::info_span!(
            "reconcile",
            org_id = %org.id,
            org_slug = %org.slug,
            env = %env,
            correlation_id = %correlation_id,
        );

        Self {
            org,
            env,
            correlation_id,
            span,
        }
    }
}

//! Plan migration handlers

use crate::dto::{ApiResponse, MigrationRequest, MigrationResponse};
use actix_web::{web, HttpResponse};
use std::sync::Arc;
use tessera_core::{
    models::{AppEnv, FullProduct},
    traits::{CustomerRepository, OrganizationRepository, ProductRepository},
    AppError,
};
use tessera_services::{MigrationJob, MigrationService};
use tracing::{info, instrument, warn};
use validator::Validate;

/// Shared state of the migration routes
pub struct MigrationState {
    /// Organization lookup for the request's `org_id`
    pub organizations: Arc<dyn OrganizationRepository>,
    /// Source and target product versions
    pub products: Arc<dyn ProductRepository>,
    /// Customers named in the request
    pub customers: Arc<dyn CustomerRepository>,
    /// Moves attachments between versions
    pub migrations: Arc<MigrationService>,
}

async fn load_product(
    state: &MigrationState,
    internal_id: &str,
    org_id: &str,
    env: AppEnv,
) -> Result<FullProduct, AppError> {
    state
        .products
        .find_full(internal_id, org_id, env)
        .await?
        .ok_or_else(|| AppError::ProductNotFound(internal_id.to_string()))
}

/// Reject a target whose usage prices could not be reconciled
fn validate_target(to_product: &FullProduct) -> Result<(), AppError> {
    for price in &to_product.prices {
        if let Some(usage) = price.usage_config() {
            usage.validate().map_err(|e| {
                warn!(price_id = %price.id, "Target price validation failed: {}", e);
                AppError::Validation(format!("Price {}: {}", price.id, e))
            })?;
        }
    }
    Ok(())
}

/// Migrate customers between two versions of a product
///
/// POST /migrations
#[instrument(skip(state, req), fields(job_id = %req.job_id, org_id = %req.org_id))]
pub async fn migrate_customers(
    state: web::Data<MigrationState>,
    req: web::Json<MigrationRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Migration request validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;
    let env = req.app_env()?;

    state
        .organizations
        .find_by_id(&req.org_id)
        .await?
        .ok_or_else(|| AppError::OrganizationNotFound(req.org_id.clone()))?;

    let from_product = load_product(&state, &req.from_product_id, &req.org_id, env).await?;
    let to_product = load_product(&state, &req.to_product_id, &req.org_id, env).await?;

    if from_product.id != to_product.id {
        return Err(AppError::Validation(format!(
            "Cannot migrate from product {} to a different product {}",
            from_product.id, to_product.id
        )));
    }
    if from_product.internal_id == to_product.internal_id {
        return Err(AppError::Validation(
            "Source and target are the same version".to_string(),
        ));
    }
    validate_target(&to_product)?;

    let customers = state
        .customers
        .list_by_internal_ids(&req.org_id, env, &req.customer_ids)
        .await?;
    let missing_customers =
        req.missing_customers(customers.iter().map(|c| c.internal_id.as_str()));
    if !missing_customers.is_empty() {
        warn!(missing = ?missing_customers, "Skipping unknown customers");
    }

    let job = MigrationJob {
        id: req.job_id.clone(),
        org_id: req.org_id.clone(),
        env,
    };

    info!(
        customers = customers.len(),
        "Migrating {} from v{} to v{}",
        to_product.id,
        from_product.version,
        to_product.version
    );

    let summary = state
        .migrations
        .migrate_customers(&job, &customers, &from_product, &to_product)
        .await;

    Ok(HttpResponse::Ok().json(ApiResponse::success(MigrationResponse {
        job_id: job.id,
        summary,
        missing_customers,
    })))
}

/// Configure migration routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/migrations", web::post().to(migrate_customers));
}

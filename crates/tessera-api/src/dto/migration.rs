//! Plan migration DTOs

use serde::{Deserialize, Serialize};
use tessera_core::{models::AppEnv, AppError};
use tessera_services::MigrationSummary;
use validator::Validate;

use super::webhook::validate_env;

/// Migration of a batch of customers between two versions of a product
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MigrationRequest {
    /// Caller-chosen id that ties log lines of one batch together
    #[validate(length(min = 1, max = 128))]
    pub job_id: String,

    /// Organization owning the products and customers
    #[validate(length(min = 1, max = 128))]
    pub org_id: String,

    /// `sandbox` or `live`
    #[validate(custom(function = "validate_env"))]
    pub env: String,

    /// Internal id of the version customers are on
    #[validate(length(min = 1))]
    pub from_product_id: String,

    /// Internal id of the version to move them to
    #[validate(length(min = 1))]
    pub to_product_id: String,

    /// Internal ids of the customers to migrate
    #[validate(length(min = 1, max = 1000))]
    pub customer_ids: Vec<String>,
}

impl MigrationRequest {
    /// Parsed environment
    pub fn app_env(&self) -> Result<AppEnv, AppError> {
        AppEnv::from_str(&self.env)
            .ok_or_else(|| AppError::Validation(format!("Unknown environment: {}", self.env)))
    }

    /// Requested ids absent from `found`, sorted and de-duplicated
    pub fn missing_customers<'a, I>(&self, found: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let found: Vec<&str> = found.into_iter().collect();
        let mut missing: Vec<String> = self
            .customer_ids
            .iter()
            .filter(|id| !found.contains(&id.as_str()))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

/// Result of a migration batch
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResponse {
    /// Echo of the request's job id
    pub job_id: String,
    /// Per-customer outcome counts
    pub summary: MigrationSummary,
    /// Requested customers that do not exist in the organization
    pub missing_customers: Vec<String>,
}

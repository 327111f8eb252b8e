//! Unified error handling for Tessera
//!
//! This module provides the error type shared by every crate in the
//! workspace, with automatic HTTP response mapping for the webhook intake.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// All errors in the application should be converted to this type.
/// It implements `ResponseError` so a failed webhook delivery answers with a
/// non-2xx status and the processor redelivers the event.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Database Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // ==================== Catalog / Ledger Errors ====================
    #[error("Organization not found: {0}")]
    OrganizationNotFound(String),

    #[error("Customer product not found: {0}")]
    CustomerProductNotFound(String),

    #[error("Customer entitlement not found: {0}")]
    EntitlementNotFound(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Unrecognized price configuration for price {0}")]
    UnknownBillingType(String),

    // ==================== Payment Processor Errors ====================
    #[error("Payment processor error: {0}")]
    Processor(String),

    #[error("Invoice {0} is finalized and cannot be edited")]
    InvoiceFinalized(String),

    #[error("Processor credentials missing for organization {org} ({env})")]
    MissingProcessorCredentials { org: String, env: String },

    // ==================== Reconciliation Errors ====================
    #[error("Reconciliation failed for {failed} customer product(s): {details}")]
    Reconciliation { failed: usize, details: String },

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) | AppError::InvalidInput(_) | AppError::MissingField(_) => {
                StatusCode::BAD_REQUEST
            }

            // 404 Not Found
            AppError::OrganizationNotFound(_)
            | AppError::CustomerProductNotFound(_)
            | AppError::EntitlementNotFound(_)
            | AppError::ProductNotFound(_)
            | AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Conflict(_) | AppError::InvoiceFinalized(_) => StatusCode::CONFLICT,

            // 502 Bad Gateway
            AppError::Processor(_) => StatusCode::BAD_GATEWAY,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::OrganizationNotFound(_) => "organization_not_found",
            AppError::CustomerProductNotFound(_) => "customer_product_not_found",
            AppError::EntitlementNotFound(_) => "entitlement_not_found",
            AppError::ProductNotFound(_) => "product_not_found",
            AppError::UnknownBillingType(_) => "unknown_billing_type",
            AppError::Processor(_) => "processor_error",
            AppError::InvoiceFinalized(_) => "invoice_finalized",
            AppError::MissingProcessorCredentials { .. } => "missing_processor_credentials",
            AppError::Reconciliation { .. } => "reconciliation_failed",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::MissingField(_) => "missing_field",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

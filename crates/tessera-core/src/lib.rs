//! Tessera Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the Tessera billing backend. It includes:
//!
//! - Domain models (customer entitlements, prices, product attachments,
//!   entities, processor invoices and subscriptions)
//! - Collaborator traits for stores and the payment processor
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

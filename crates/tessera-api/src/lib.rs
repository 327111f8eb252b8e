//! API layer for Tessera
//!
//! Webhook intake for payment processor events, and plan migration of
//! customer batches.

#![forbid(unsafe_code)]
#![warn(clippy::all, missing_docs)]

pub mod dto;
pub mod handlers;

pub use dto::{ApiResponse, MigrationRequest, MigrationResponse, WebhookAck, WebhookPath};
pub use handlers::{configure_migrations, configure_webhooks, MigrationState, WebhookState};

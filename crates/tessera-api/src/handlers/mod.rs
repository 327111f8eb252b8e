//! HTTP request handlers

pub mod migration;
pub mod webhook;

pub use migration::configure as configure_migrations;
pub use migration::MigrationState;
pub use webhook::configure as configure_webhooks;
pub use webhook::WebhookState;

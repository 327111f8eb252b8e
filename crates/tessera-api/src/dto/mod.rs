//! Data transfer objects for the HTTP surface

pub mod common;
pub mod migration;
pub mod webhook;

pub use common::ApiResponse;
pub use migration::{MigrationRequest, MigrationResponse};
pub use webhook::{WebhookAck, WebhookPath};

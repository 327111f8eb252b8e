//! Tessera Database Layer
//!
//! PostgreSQL implementations of the repository traits declared in
//! `tessera-core`:
//!
//! - Connection pool management
//! - Customer entitlement ledger with atomic balance and entity-map updates
//! - Customer products, entities, features and organizations
//! - Catalog products with their prices and entitlements, and customers

pub mod pool;
pub mod repositories;

pub use pool::create_pool;
pub use repositories::*;

// Re-export commonly used types
pub use sqlx::{PgPool, Postgres, Transaction};
pub use tessera_core::{AppError, AppResult};

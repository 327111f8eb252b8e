//! Customer entity model
//!
//! Entities are sub-resources of a customer (a seat, a project) with their
//! own lifecycle. Deletion is soft until the prorated-arrear pass settles the
//! billing period and purges them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entity owned by a customer and counted against a feature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Internal primary key
    pub internal_id: String,

    /// Caller supplied identifier, used as the key in entitlement entity maps
    pub id: Option<String>,

    pub name: Option<String>,

    pub internal_customer_id: String,

    pub internal_feature_id: String,

    pub feature_id: String,

    /// Soft-deletion flag
    pub deleted: bool,

    pub created_at: DateTime<Utc>,
}

impl Entity {
    /// Description fragment naming the entity, e.g. `Alice (ID: user_1)`
    pub fn details(&self) -> Option<String> {
        match (self.name.as_deref(), self.id.as_deref()) {
            (Some(name), Some(id)) => Some(format!("{} (ID: {})", name, id)),
            (Some(name), None) => Some(name.to_string()),
            (None, Some(id)) => Some(id.to_string()),
            (None, None) => None,
        }
    }
}

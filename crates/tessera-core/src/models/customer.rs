//! Organization, environment and customer models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Deployment environment of an organization's catalog and processor account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    /// Test-mode data and processor keys
    #[default]
    Sandbox,
    /// Production data and processor keys
    Live,
}

impl fmt::Display for AppEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppEnv::Sandbox => write!(f, "sandbox"),
            AppEnv::Live => write!(f, "live"),
        }
    }
}

impl AppEnv {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sandbox" | "test" => Some(AppEnv::Sandbox),
            "live" | "production" => Some(AppEnv::Live),
            _ => None,
        }
    }
}

/// Processor secret keys held per organization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessorKeys {
    pub test_secret_key: Option<String>,
    pub live_secret_key: Option<String>,
}

/// Tenant owning a catalog and a processor account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub processor_keys: ProcessorKeys,
}

impl Organization {
    /// Secret key for the given environment, if configured
    pub fn secret_key(&self, env: AppEnv) -> Option<&str> {
        match env {
            AppEnv::Sandbox => self.processor_keys.test_secret_key.as_deref(),
            AppEnv::Live => self.processor_keys.live_secret_key.as_deref(),
        }
    }
}

/// Customer of an organization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    /// Internal primary key
    pub internal_id: String,

    /// Caller supplied identifier
    pub id: Option<String>,

    pub name: Option<String>,

    pub email: Option<String>,

    /// Processor-side customer id (e.g. `cus_...`)
    pub processor_id: Option<String>,

    pub org_id: String,

    pub env: AppEnv,
}

impl Customer {
    /// Name for log lines, falling back to identifiers
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or(&self.internal_id)
    }
}

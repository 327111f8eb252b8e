//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub stripe: StripeConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Emit JSON log lines instead of the human readable format
    #[serde(default)]
    pub json_logs: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

/// Payment processor (Stripe) client configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StripeConfig {
    /// Base URL of the Stripe REST API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Pinned API version sent with every request
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Request timeout in seconds
    #[serde(default = "default_stripe_timeout")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_api_version() -> String {
    "2024-06-20".to_string()
}

fn default_stripe_timeout() -> u64 {
    30
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_version: default_api_version(),
            timeout_secs: default_stripe_timeout(),
        }
    }
}

/// Usage reconciliation tuning
#[derive(Debug, Deserialize, Clone)]
pub struct ReconciliationConfig {
    /// Invoices created within this many minutes of the customer product are
    /// provisioning artifacts, not period rollovers
    #[serde(default = "default_recent_window")]
    pub recent_creation_window_minutes: i64,

    /// Usage is attributed this many seconds before invoice creation
    #[serde(default = "default_usage_backdate")]
    pub usage_backdate_secs: i64,
}

fn default_recent_window() -> i64 {
    10
}

fn default_usage_backdate() -> i64 {
    86_400 // 1 day
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            recent_creation_window_minutes: default_recent_window(),
            usage_backdate_secs: default_usage_backdate(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("server.json_logs", false)?
            .set_default("database.max_connections", 10)?
            .set_default("stripe.api_base", default_api_base())?
            .set_default("stripe.api_version", default_api_version())?
            .set_default("stripe.timeout_secs", 30)?
            .set_default("reconciliation.recent_creation_window_minutes", 10)?
            .set_default("reconciliation.usage_backdate_secs", 86_400)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with TESSERA_ prefix
            .add_source(
                Environment::with_prefix("TESSERA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("TESSERA").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

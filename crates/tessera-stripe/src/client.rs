//! Stripe REST client
//!
//! Requests are form-encoded, authenticated with the account's secret key
//! and pinned to one API version.

use reqwest::{Client, ClientBuilder, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tessera_core::{config::StripeConfig, AppError};
use thiserror::Error;
use tracing::{debug, error, instrument};

use super::types::ApiErrorBody;

/// Message Stripe returns when an invoice can no longer be edited
pub const FINALIZED_INVOICE_MESSAGE: &str = "Finalized invoices can't be updated in this way";

/// Stripe client errors
#[derive(Debug, Error)]
pub enum StripeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: request took longer than {0}s")]
    Timeout(u64),

    #[error("HTTP error: status {0}")]
    HttpError(u16),

    #[error("Stripe API error ({status} {kind}): {message}")]
    Api {
        status: u16,
        kind: String,
        code: Option<String>,
        message: String,
    },

    #[error("Invoice finalized: {0}")]
    InvoiceFinalized(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<StripeError> for AppError {
    fn from(err: StripeError) -> Self {
        match err {
            StripeError::InvoiceFinalized(message) => AppError::InvoiceFinalized(message),
            StripeError::Config(message) => AppError::Config(message),
            other => AppError::Processor(other.to_string()),
        }
    }
}

/// Ordered form body in Stripe's bracketed-key notation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormParams(Vec<(String, String)>);

impl FormParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.0.push((key.into(), value.to_string()));
        self
    }

    /// Add `prefix[key]=value` for every entry
    pub fn push_map<'a, I>(&mut self, prefix: &str, entries: I) -> &mut Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in entries {
            self.0.push((format!("{}[{}]", prefix, key), value.clone()));
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn as_pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

/// Client for one Stripe account
pub struct StripeClient {
    http_client: Client,
    base_url: String,
    secret_key: String,
    api_version: String,
    timeout_secs: u64,
}

impl StripeClient {
    /// Create a new Stripe client
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root (e.g. "https://api.stripe.com")
    /// * `secret_key` - Account secret key
    /// * `api_version` - Value sent as `Stripe-Version`
    /// * `timeout_secs` - Per-request timeout
    pub fn new(
        base_url: &str,
        secret_key: &str,
        api_version: &str,
        timeout_secs: u64,
    ) -> Result<Self, StripeError> {
        if secret_key.trim().is_empty() {
            return Err(StripeError::Config("Stripe secret key is empty".to_string()));
        }

        let http_client = ClientBuilder::new()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| StripeError::Connection(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
            api_version: api_version.to_string(),
            timeout_secs,
        })
    }

    pub fn from_config(config: &StripeConfig, secret_key: &str) -> Result<Self, StripeError> {
        Self::new(
            &config.api_base,
            secret_key,
            &config.api_version,
            config.timeout_secs,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.secret_key)
            .header("Stripe-Version", &self.api_version)
    }

    /// GET a resource
    #[instrument(skip(self))]
    pub async fn get<R>(&self, path: &str) -> Result<R, StripeError>
    where
        R: DeserializeOwned,
    {
        let request = self.authorize(self.http_client.get(self.url(path)));
        self.send(path, request).await
    }

    /// POST a form-encoded body
    #[instrument(skip(self, form))]
    pub async fn post_form<R>(&self, path: &str, form: &FormParams) -> Result<R, StripeError>
    where
        R: DeserializeOwned,
    {
        let request = self
            .authorize(self.http_client.post(self.url(path)))
            .form(form.as_pairs());
        self.send(path, request).await
    }

    async fn send<R>(&self, path: &str, request: RequestBuilder) -> Result<R, StripeError>
    where
        R: DeserializeOwned,
    {
        debug!("Stripe request: {}", path);

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                StripeError::Timeout(self.timeout_secs)
            } else {
                StripeError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            StripeError::ParseError(format!("Failed to read response body: {}", e))
        })?;

        if !status.is_success() {
            let err = classify_error(status.as_u16(), &body);
            error!("Stripe request {} failed: {}", path, err);
            return Err(err);
        }

        serde_json::from_str(&body)
            .map_err(|e| StripeError::ParseError(format!("Failed to parse JSON: {}", e)))
    }
}

/// Map a non-2xx response body onto a client error
pub(crate) fn classify_error(status: u16, body: &str) -> StripeError {
    let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) else {
        return StripeError::HttpError(status);
    };

    let detail = parsed.error;
    let message = detail.message.unwrap_or_default();

    if message.contains(FINALIZED_INVOICE_MESSAGE) {
        return StripeError::InvoiceFinalized(message);
    }

    StripeError::Api {
        status,
        kind: detail.kind,
        code: detail.code,
        message,
    }
}

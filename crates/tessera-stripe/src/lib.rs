//! Stripe integration for Tessera
//!
//! A thin REST client over `reqwest` covering the calls usage reconciliation
//! needs, plus the webhook event envelope:
//!
//! - invoice items on open invoices
//! - billing meter lookup and meter events
//! - invoice description updates
//! - subscription retrieval
//!
//! # Usage
//!
//! ```rust,ignore
//! use tessera_stripe::StripeProcessorProvider;
//!
//! let provider = StripeProcessorProvider::new(config.stripe.clone());
//! let processor = provider.processor(&org, AppEnv::Live)?;
//! let subs = processor.get_subscriptions(&["sub_123".to_string()]).await?;
//! ```

mod client;
mod processor;
mod types;

pub use client::{FormParams, StripeClient, StripeError, FINALIZED_INVOICE_MESSAGE};
pub use processor::{StripeProcessor, StripeProcessorProvider};
pub use types::*;

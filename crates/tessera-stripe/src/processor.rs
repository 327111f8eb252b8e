//! `PaymentProcessor` backed by the Stripe REST API

use async_trait::async_trait;
use futures::future::try_join_all;
use parking_lot::RwLock;
use serde::de::IgnoredAny;
use std::collections::HashMap;
use std::sync::Arc;
use tessera_core::{
    config::StripeConfig,
    models::{AppEnv, InvoiceItem, InvoiceItemSpec, MeterEventSpec, Organization, Subscription},
    traits::{PaymentProcessor, ProcessorProvider},
    AppError, AppResult,
};
use tracing::{debug, info, instrument};

use super::client::{FormParams, StripeClient};
use super::types::{Meter, MeterEvent};

/// Stripe account bound processor
pub struct StripeProcessor {
    client: StripeClient,
}

impl StripeProcessor {
    pub fn new(client: StripeClient) -> Self {
        Self { client }
    }

    fn invoice_item_form(spec: &InvoiceItemSpec) -> FormParams {
        let mut form = FormParams::new();
        form.push("customer", &spec.customer)
            .push("invoice", &spec.invoice)
            .push("currency", &spec.currency)
            .push("amount", spec.amount_minor)
            .push("description", &spec.description)
            .push("period[start]", spec.period_start)
            .push("period[end]", spec.period_end)
            .push_map("metadata", &spec.metadata);
        form
    }

    fn meter_event_form(meter: &Meter, spec: &MeterEventSpec) -> FormParams {
        let mut form = FormParams::new();
        form.push("event_name", &meter.event_name)
            .push("timestamp", spec.timestamp)
            .push(format!("payload[{}]", meter.customer_key()), &spec.customer)
            .push(
                format!("payload[{}]", meter.value_key()),
                spec.value.normalize(),
            );
        form
    }
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    #[instrument(skip(self, spec), fields(invoice_id = %spec.invoice, amount = spec.amount_minor))]
    async fn create_invoice_item(&self, spec: &InvoiceItemSpec) -> AppResult<InvoiceItem> {
        let form = Self::invoice_item_form(spec);
        let item: InvoiceItem = self.client.post_form("/v1/invoiceitems", &form).await?;

        info!(
            "Created invoice item {} on {} ({} {})",
            item.id, spec.invoice, item.amount, item.currency
        );
        Ok(item)
    }

    #[instrument(skip(self, spec), fields(meter_id = %spec.meter_id, value = %spec.value))]
    async fn submit_meter_event(&self, spec: &MeterEventSpec) -> AppResult<()> {
        let meter: Meter = self
            .client
            .get(&format!("/v1/billing/meters/{}", spec.meter_id))
            .await?;

        let form = Self::meter_event_form(&meter, spec);
        let event: MeterEvent = self
            .client
            .post_form("/v1/billing/meter_events", &form)
            .await?;

        debug!(
            "Submitted meter event {} ({:?})",
            event.event_name, event.identifier
        );
        Ok(())
    }

    #[instrument(skip(self, description))]
    async fn update_invoice_description(&self, invoice_id: &str, description: &str) -> AppResult<()> {
        let mut form = FormParams::new();
        form.push("description", description);

        let _: IgnoredAny = self
            .client
            .post_form(&format!("/v1/invoices/{}", invoice_id), &form)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_subscriptions(&self, ids: &[String]) -> AppResult<Vec<Subscription>> {
        let mut unique: Vec<&String> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }

        let subs = try_join_all(unique.into_iter().map(|id| {
            let path = format!("/v1/subscriptions/{}", id);
            async move { self.client.get::<Subscription>(&path).await }
        }))
        .await?;

        Ok(subs)
    }
}

/// Processor built for one secret key
struct CachedProcessor {
    secret_key: String,
    processor: Arc<StripeProcessor>,
}

/// Hands out one cached processor per organization and environment
///
/// A cached processor is rebuilt when the organization's secret key changes.
pub struct StripeProcessorProvider {
    config: StripeConfig,
    processors: RwLock<HashMap<(String, AppEnv), CachedProcessor>>,
}

impl StripeProcessorProvider {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            config,
            processors: RwLock::new(HashMap::new()),
        }
    }
}

impl ProcessorProvider for StripeProcessorProvider {
    fn processor(&self, org: &Organization, env: AppEnv) -> AppResult<Arc<dyn PaymentProcessor>> {
        let secret_key = org
            .secret_key(env)
            .ok_or_else(|| AppError::MissingProcessorCredentials {
                org: org.id.clone(),
                env: env.to_string(),
            })?;

        let key = (org.id.clone(), env);
        if let Some(cached) = self.processors.read().get(&key) {
            if cached.secret_key == secret_key {
                return Ok(cached.processor.clone());
            }
            info!("Secret key of org {} ({}) changed, rebuilding processor", org.id, env);
        }

        let client = StripeClient::from_config(&self.config, secret_key)?;
        let processor = Arc::new(StripeProcessor::new(client));
        self.processors.write().insert(
            key,
            CachedProcessor {
                secret_key: secret_key.to_string(),
                processor: processor.clone(),
            },
        );

        debug!("Created Stripe processor for org {} ({})", org.id, env);
        Ok(processor)
    }
}

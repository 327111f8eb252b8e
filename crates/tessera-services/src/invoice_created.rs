//! `invoice.created` orchestration
//!
//! The processor opens the next invoice of a subscription when a period
//! closes. For every attachment billed by that subscription this handler:
//! - Annotates the invoice with the entity it bills (best effort)
//! - Classifies each customer price and keeps the in-arrear ones
//! - Reports usage and resets balances, or settles mid-period deletions
//!
//! Attachments are reconciled in isolation. Failures are collected and
//! returned once every attachment has run, so a redelivery retries them.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tessera_core::{
    config::ReconciliationConfig,
    models::{CusProductStatus, CustomerPrice, Entity, FullCusProduct, Invoice, Subscription},
    traits::{
        CustomerProductRepository, EntitlementRepository, EntityRepository, FeatureRepository,
        PaymentProcessor, ProcessorProvider,
    },
    AppError, AppResult,
};
use tracing::{debug, error, info, instrument, warn};

use crate::classifier::{classify, BillingType};
use crate::context::ReconcileContext;
use crate::period::{PeriodDecision, PeriodReconciler, SkipReason};
use crate::prorated::{ProratedDeletionHandler, ProratedOutcome};
use crate::usage_reporter::{UsageOutcome, UsageReporter};

/// Storage collaborators of the handler
#[derive(Clone)]
pub struct ReconcileStores {
    pub entitlements: Arc<dyn EntitlementRepository>,
    pub cus_products: Arc<dyn CustomerProductRepository>,
    pub entities: Arc<dyn EntityRepository>,
    pub features: Arc<dyn FeatureRepository>,
}

/// A price line left untouched, and why
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedLine {
    pub cus_product_id: String,
    pub price_id: String,
    pub reason: SkipReason,
}

/// Summary of one `invoice.created` run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    /// Attachments billed by the invoice's subscription
    pub cus_products: usize,
    /// Whether the invoice description was set
    pub annotated: bool,
    /// Price ids whose usage reached the processor
    pub reported: Vec<String>,
    /// Entitlements reset for the next period
    pub reset: usize,
    /// Balance credited back for deleted entities
    pub credited: Decimal,
    pub skipped: Vec<SkippedLine>,
    /// Price ids with an unrecognized config
    pub unclassified: Vec<String>,
}

impl ReconcileOutcome {
    fn skip(&mut self, cus_product: &FullCusProduct, price_id: &str, reason: SkipReason) {
        self.skipped.push(SkippedLine {
            cus_product_id: cus_product.id.clone(),
            price_id: price_id.to_string(),
            reason,
        });
    }
}

/// The subscription that bills usage of a feature for an attachment
///
/// Prefers the subscription listing the feature in its usage metadata. An
/// attachment billed by a single subscription uses that one.
pub fn resolve_usage_subscription<'a>(
    cus_product: &FullCusProduct,
    subscriptions: &'a [Subscription],
    internal_feature_id: &str,
) -> Option<&'a Subscription> {
    let own: Vec<&Subscription> = subscriptions
        .iter()
        .filter(|s| cus_product.subscription_ids.contains(&s.id))
        .collect();

    own.iter()
        .find(|s| s.bills_usage_for(internal_feature_id))
        .copied()
        .or_else(|| match own.as_slice() {
            [only] => Some(*only),
            _ => None,
        })
}

/// Entry point for `invoice.created`
pub struct InvoiceCreatedHandler {
    stores: ReconcileStores,
    provider: Arc<dyn ProcessorProvider>,
    period: PeriodReconciler,
    reporter: UsageReporter,
    prorated: ProratedDeletionHandler,
}

impl InvoiceCreatedHandler {
    pub fn new(
        stores: ReconcileStores,
        provider: Arc<dyn ProcessorProvider>,
        config: &ReconciliationConfig,
    ) -> Self {
        let period = PeriodReconciler::new(config);
        let reporter = UsageReporter::new(stores.entitlements.clone(), config);
        let prorated = ProratedDeletionHandler::new(
            stores.entitlements.clone(),
            stores.entities.clone(),
            period.clone(),
        );

        Self {
            stores,
            provider,
            period,
            reporter,
            prorated,
        }
    }

    /// Reconcile the period closed by `invoice`
    #[instrument(skip_all, parent = &ctx.span, fields(invoice_id = %invoice.id))]
    pub async fn handle(
        &self,
        ctx: &ReconcileContext,
        invoice: &Invoice,
    ) -> AppResult<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::default();

        let Some(subscription_id) = invoice.subscription.as_deref() else {
            debug!("Invoice has no subscription, nothing to reconcile");
            return Ok(outcome);
        };

        let cus_products = self
            .stores
            .cus_products
            .list_by_subscription(
                subscription_id,
                &ctx.org.id,
                ctx.env,
                &CusProductStatus::billable(),
            )
            .await?;

        if cus_products.is_empty() {
            warn!(subscription_id, "No customer products found for invoice");
            return Ok(outcome);
        }
        outcome.cus_products = cus_products.len();

        let processor = self.provider.processor(&ctx.org, ctx.env)?;

        if let Some(cus_product) = cus_products.iter().find(|cp| cp.is_entity_scoped()) {
            outcome.annotated = self
                .annotate_invoice(ctx, processor.as_ref(), invoice, cus_product)
                .await;
        }

        let mut subscription_ids: Vec<String> = cus_products
            .iter()
            .flat_map(|cp| cp.subscription_ids.iter().cloned())
            .collect();
        subscription_ids.sort();
        subscription_ids.dedup();

        let subscriptions = processor.get_subscriptions(&subscription_ids).await?;

        let mut failures = Vec::new();
        for cus_product in &cus_products {
            let result = self
                .reconcile_cus_product(
                    ctx,
                    processor.as_ref(),
                    invoice,
                    cus_product,
                    &subscriptions,
                    &mut outcome,
                )
                .await;

            if let Err(e) = result {
                error!(
                    cus_product_id = %cus_product.id,
                    customer = %cus_product.customer.display_name(),
                    "Failed to reconcile customer product: {}",
                    e
                );
                failures.push(format!("{}: {}", cus_product.id, e));
            }
        }

        if !failures.is_empty() {
            return Err(AppError::Reconciliation {
                failed: failures.len(),
                details: failures.join("; "),
            });
        }

        info!(
            cus_products = outcome.cus_products,
            reported = outcome.reported.len(),
            reset = outcome.reset,
            credited = %outcome.credited,
            skipped = outcome.skipped.len(),
            unclassified = outcome.unclassified.len(),
            "Reconciled invoice"
        );

        Ok(outcome)
    }

    /// Set the invoice description to the entity it bills
    ///
    /// Never fails the run. A finalized invoice cannot take a description
    /// and is expected once the processor finalizes quickly.
    async fn annotate_invoice(
        &self,
        ctx: &ReconcileContext,
        processor: &dyn PaymentProcessor,
        invoice: &Invoice,
        cus_product: &FullCusProduct,
    ) -> bool {
        let description = match self.entity_description(ctx, cus_product).await {
            Ok(Some(description)) => description,
            Ok(None) => return false,
            Err(e) => {
                error!("Failed to build invoice description: {}", e);
                return false;
            }
        };

        match processor
            .update_invoice_description(&invoice.id, &description)
            .await
        {
            Ok(()) => {
                debug!(%description, "Set invoice description");
                true
            }
            Err(AppError::InvoiceFinalized(_)) => false,
            Err(e) => {
                error!("Failed to set invoice description: {}", e);
                false
            }
        }
    }

    async fn entity_description(
        &self,
        ctx: &ReconcileContext,
        cus_product: &FullCusProduct,
    ) -> AppResult<Option<String>> {
        let Some(entity) = self.find_entity(ctx, cus_product).await? else {
            return Ok(None);
        };

        let features = self.stores.features.list(&ctx.org.id, ctx.env).await?;
        let Some(feature) = features
            .iter()
            .find(|f| f.internal_id == entity.internal_feature_id)
        else {
            return Ok(None);
        };

        Ok(entity
            .details()
            .map(|details| format!("{}: {}", feature.display_name(false, true), details)))
    }

    async fn find_entity(
        &self,
        ctx: &ReconcileContext,
        cus_product: &FullCusProduct,
    ) -> AppResult<Option<Entity>> {
        match cus_product.internal_entity_id.as_deref() {
            Some(internal_id) => {
                self.stores
                    .entities
                    .find_by_internal_id(internal_id, &ctx.org.id, ctx.env)
                    .await
            }
            None => Ok(None),
        }
    }

    #[instrument(
        skip_all,
        parent = &ctx.span,
        fields(cus_product_id = %cus_product.id, product_id = %cus_product.product_id)
    )]
    async fn reconcile_cus_product(
        &self,
        ctx: &ReconcileContext,
        processor: &dyn PaymentProcessor,
        invoice: &Invoice,
        cus_product: &FullCusProduct,
        subscriptions: &[Subscription],
        outcome: &mut ReconcileOutcome,
    ) -> AppResult<()> {
        let ledger = self
            .stores
            .cus_products
            .get_entitlements_and_prices(&cus_product.id)
            .await?;
        let entity = self.find_entity(ctx, cus_product).await?;

        for CustomerPrice { price, .. } in &ledger.customer_prices {
            let billing_type = classify(&price.config);

            if billing_type == BillingType::Unknown {
                let err = AppError::UnknownBillingType(price.id.clone());
                error!(code = err.error_code(), "{}, price left unreconciled", err);
                outcome.unclassified.push(price.id.clone());
                continue;
            }

            if !billing_type.settles_at_period_end() {
                continue;
            }

            let Some(config) = price.usage_config() else {
                continue;
            };

            let Some(cus_ent) = ledger
                .customer_entitlements
                .iter()
                .find(|ce| ce.internal_feature_id == config.internal_feature_id)
            else {
                warn!(
                    price_id = %price.id,
                    feature_id = %config.feature_id,
                    "No customer entitlement for usage price"
                );
                continue;
            };

            let Some(subscription) =
                resolve_usage_subscription(cus_product, subscriptions, &config.internal_feature_id)
            else {
                warn!(price_id = %price.id, "No subscription bills usage for price");
                continue;
            };

            if invoice.subscription.as_deref() != Some(subscription.id.as_str()) {
                debug!(
                    price_id = %price.id,
                    usage_subscription = %subscription.id,
                    "Usage billed by another subscription"
                );
                continue;
            }

            if let PeriodDecision::Skip(reason) = self.period.check_trial_boundary(subscription) {
                info!(price_id = %price.id, %reason, "Skipping price line");
                outcome.skip(cus_product, &price.id, reason);
                continue;
            }

            match billing_type {
                BillingType::UsageInArrear => {
                    let settled = self
                        .reporter
                        .settle(
                            ctx,
                            processor,
                            invoice,
                            cus_product,
                            cus_ent,
                            price,
                            config,
                            subscription,
                            entity.as_ref(),
                        )
                        .await?;

                    match settled {
                        UsageOutcome::Reported { reset, .. } => {
                            outcome.reported.push(price.id.clone());
                            if reset {
                                outcome.reset += 1;
                            }
                        }
                        UsageOutcome::Skipped(reason) => outcome.skip(cus_product, &price.id, reason),
                    }
                }
                BillingType::InArrearProrated => {
                    let settled = self
                        .prorated
                        .settle(
                            ctx,
                            invoice,
                            subscription,
                            config,
                            cus_ent,
                            &ledger.customer_entitlements,
                        )
                        .await?;

                    match settled {
                        ProratedOutcome::Settled(settlement) => {
                            outcome.credited += settlement.credited
                        }
                        ProratedOutcome::Skipped(reason) => {
                            outcome.skip(cus_product, &price.id, reason)
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }
}

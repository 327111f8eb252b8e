//! Usage-in-arrear reporting
//!
//! At period close the quantity consumed is `allowance - remaining balance`.
//! Entity-scoped attachments bill their overage as an invoice line item on
//! the new invoice; aggregate attachments send the rounded quantity to the
//! price's processor meter. Balances are reset only after the processor
//! accepted the report, and only when the entitlement has a reset cadence.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::{
    config::ReconciliationConfig,
    models::{
        CustomerEntitlement, Entity, FullCusProduct, Invoice, InvoiceItemSpec, MeterEventSpec,
        Price, Subscription, UsagePriceConfig,
    },
    traits::{EntitlementRepository, PaymentProcessor},
    AppError, AppResult,
};
use tracing::{info, instrument, warn};

use crate::constants::ZERO_DECIMAL_CURRENCIES;
use crate::context::ReconcileContext;
use crate::period::{PeriodDecision, PeriodReconciler, SkipReason};
use crate::reset::{plan_reset, ResetEngine};

/// Quantities derived from the closing balance
#[derive(Debug, Clone, PartialEq)]
pub struct UsageQuantities {
    /// Remaining balance; only negative entity balances count when entity-scoped
    pub remaining: Decimal,
    /// Units consumed this period
    pub total_quantity: Decimal,
    /// Consumed units rounded up to whole billing units
    pub rounded_quantity: Decimal,
    /// Unix seconds the usage is attributed to
    pub usage_timestamp: i64,
}

/// How usage reached the processor
#[derive(Debug, Clone, PartialEq)]
pub enum UsageReport {
    InvoiceItem {
        item_id: String,
        overage: Decimal,
        amount_minor: i64,
    },
    /// Entity-scoped attachment closed within its allowance; nothing was posted
    NoOverage,
    MeterEvent {
        meter_id: String,
        value: Decimal,
    },
}

/// Result of settling one usage-in-arrear line
#[derive(Debug, Clone, PartialEq)]
pub enum UsageOutcome {
    Reported {
        report: UsageReport,
        quantities: UsageQuantities,
        reset: bool,
    },
    Skipped(SkipReason),
}

/// Remaining balance the period closes with
///
/// Entity-scoped entitlements sum only their negative entity balances.
pub fn remaining_balance(cus_ent: &CustomerEntitlement) -> Decimal {
    match cus_ent.entities.as_ref().filter(|_| cus_ent.is_entity_scoped()) {
        Some(entities) => entities.total_overage(),
        None => cus_ent.balance.unwrap_or(Decimal::ZERO),
    }
}

/// Compute the quantities to report for a closing period
pub fn compute_usage(
    cus_ent: &CustomerEntitlement,
    config: &UsagePriceConfig,
    invoice_created: i64,
    backdate_secs: i64,
) -> UsageQuantities {
    let remaining = remaining_balance(cus_ent);
    let total_quantity = cus_ent.allowance() - remaining;

    UsageQuantities {
        remaining,
        total_quantity,
        rounded_quantity: config.round_up_to_units(total_quantity),
        usage_timestamp: invoice_created - backdate_secs,
    }
}

/// Convert a major-unit amount into the currency's minor unit
pub fn to_minor_units(amount: Decimal, currency: &str) -> Option<i64> {
    let zero_decimal = ZERO_DECIMAL_CURRENCIES.contains(&currency.to_lowercase().as_str());
    let scaled = if zero_decimal {
        amount
    } else {
        amount * Decimal::ONE_HUNDRED
    };

    scaled
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Reports usage-in-arrear lines and resets their entitlements
pub struct UsageReporter {
    period: PeriodReconciler,
    reset: ResetEngine,
    backdate_secs: i64,
}

impl UsageReporter {
    pub fn new(entitlements: Arc<dyn EntitlementRepository>, config: &ReconciliationConfig) -> Self {
        Self {
            period: PeriodReconciler::new(config),
            reset: ResetEngine::new(entitlements),
            backdate_secs: config.usage_backdate_secs,
        }
    }

    fn invoice_item_spec(
        invoice: &Invoice,
        cus_product: &FullCusProduct,
        cus_ent: &CustomerEntitlement,
        price: &Price,
        config: &UsagePriceConfig,
        quantities: &UsageQuantities,
        entity: Option<&Entity>,
    ) -> AppResult<(InvoiceItemSpec, Decimal)> {
        let customer = invoice
            .customer
            .clone()
            .or_else(|| cus_product.customer.processor_id.clone())
            .ok_or_else(|| AppError::MissingField("customer.processor_id".to_string()))?;

        let overage = -quantities.remaining;
        let amount = config.price_for_overage(overage);
        let amount_minor = to_minor_units(amount, &invoice.currency).ok_or_else(|| {
            AppError::Internal(format!("Invoice item amount {} out of range", amount))
        })?;

        let feature_name = cus_ent.entitlement.feature.display_name(true, true);
        let mut description = format!(
            "{} usage: {} ({} over allowance)",
            feature_name,
            quantities.total_quantity.normalize(),
            overage.max(Decimal::ZERO).normalize()
        );
        if let Some(details) = entity.and_then(Entity::details) {
            description.push_str(&format!(" - {}", details));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("customer_product_id".to_string(), cus_product.id.clone());
        metadata.insert("customer_entitlement_id".to_string(), cus_ent.id.clone());
        metadata.insert("price_id".to_string(), price.id.clone());
        metadata.insert(
            "total_usage".to_string(),
            quantities.total_quantity.normalize().to_string(),
        );
        if let Some(entity_id) = &cus_product.internal_entity_id {
            metadata.insert("internal_entity_id".to_string(), entity_id.clone());
        }

        let spec = InvoiceItemSpec {
            customer,
            invoice: invoice.id.clone(),
            currency: invoice.currency.clone(),
            amount_minor,
            description,
            period_start: invoice.period_start,
            period_end: invoice.period_end,
            metadata,
        };

        Ok((spec, overage))
    }

    /// Settle one usage-in-arrear price line
    #[allow(clippy::too_many_arguments)]
    #[instrument(
        skip_all,
        parent = &ctx.span,
        fields(cus_product_id = %cus_product.id, feature_id = %cus_ent.feature_id, price_id = %price.id)
    )]
    pub async fn settle(
        &self,
        ctx: &ReconcileContext,
        processor: &dyn PaymentProcessor,
        invoice: &Invoice,
        cus_product: &FullCusProduct,
        cus_ent: &CustomerEntitlement,
        price: &Price,
        config: &UsagePriceConfig,
        subscription: &Subscription,
        entity: Option<&Entity>,
    ) -> AppResult<UsageOutcome> {
        if let PeriodDecision::Skip(reason) =
            self.period.check_usage_in_arrear(invoice, cus_product, cus_ent)
        {
            info!(%reason, "Skipping usage in arrear");
            return Ok(UsageOutcome::Skipped(reason));
        }

        let quantities = compute_usage(cus_ent, config, invoice.created, self.backdate_secs);

        let report = if cus_product.is_entity_scoped() && quantities.remaining >= Decimal::ZERO {
            info!(
                remaining = %quantities.remaining,
                "No overage on entity-scoped product, skipping invoice item"
            );
            UsageReport::NoOverage
        } else if cus_product.is_entity_scoped() {
            let (spec, overage) = Self::invoice_item_spec(
                invoice,
                cus_product,
                cus_ent,
                price,
                config,
                &quantities,
                entity,
            )?;
            let item = processor.create_invoice_item(&spec).await?;

            UsageReport::InvoiceItem {
                item_id: item.id,
                overage,
                amount_minor: spec.amount_minor,
            }
        } else {
            let Some(meter_id) = config.stripe_meter_id.clone() else {
                warn!("Price {} has no meter id, skipping usage report", price.id);
                return Ok(UsageOutcome::Skipped(SkipReason::MissingMeter));
            };

            let customer = cus_product
                .customer
                .processor_id
                .clone()
                .ok_or_else(|| AppError::MissingField("customer.processor_id".to_string()))?;

            let spec = MeterEventSpec {
                meter_id: meter_id.clone(),
                customer,
                value: quantities.rounded_quantity,
                timestamp: quantities.usage_timestamp,
            };
            processor.submit_meter_event(&spec).await?;

            UsageReport::MeterEvent {
                meter_id,
                value: quantities.rounded_quantity,
            }
        };

        info!(
            customer = %cus_product.customer.display_name(),
            total_quantity = %quantities.total_quantity,
            rounded_quantity = %quantities.rounded_quantity,
            "Reported usage in arrear"
        );

        if cus_ent.entitlement.interval.is_lifetime() || !cus_ent.has_reset_cadence() {
            return Ok(UsageOutcome::Reported {
                report,
                quantities,
                reset: false,
            });
        }

        let plan = plan_reset(cus_ent, subscription.current_period_end);
        self.reset.apply(ctx, cus_ent, &plan).await?;

        Ok(UsageOutcome::Reported {
            report,
            quantities,
            reset: true,
        })
    }
}

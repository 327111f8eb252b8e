//! Period reconciliation guards
//!
//! `invoice.created` fires for cycle invoices but also for upgrades, for the
//! first invoice of a fresh attachment and for trial conversions. Only a
//! genuine period close may report usage or reset balances. Each guard
//! returns a typed decision; a skip is a normal outcome, never an error.

use chrono::Duration;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use tessera_core::config::ReconciliationConfig;
use tessera_core::models::{CustomerEntitlement, FullCusProduct, Invoice, Subscription};

use crate::constants::MILLIS_PER_SECOND;

/// Why a price line was left untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Attachment created within the duplicate window of the invoice
    RecentlyAttached,
    /// Invoice raised by a plan change
    SubscriptionUpdate,
    /// Invoice does not open a new subscription period
    SamePeriod,
    /// First invoice after a trial ended
    TrialBoundary,
    /// Never-resetting entitlement that still has balance left
    LifetimeSurplus,
    /// Usage price without a processor meter
    MissingMeter,
    /// Prorated line with no soft-deleted entities to settle
    NoDeletedEntities,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::RecentlyAttached => "recently_attached",
            SkipReason::SubscriptionUpdate => "subscription_update",
            SkipReason::SamePeriod => "same_period",
            SkipReason::TrialBoundary => "trial_boundary",
            SkipReason::LifetimeSurplus => "lifetime_surplus",
            SkipReason::MissingMeter => "missing_meter",
            SkipReason::NoDeletedEntities => "no_deleted_entities",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of the period guards for one price line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodDecision {
    NewPeriod,
    Skip(SkipReason),
}

impl PeriodDecision {
    pub fn is_new_period(&self) -> bool {
        matches!(self, PeriodDecision::NewPeriod)
    }
}

/// Decides whether an invoice closes a billing period
#[derive(Debug, Clone)]
pub struct PeriodReconciler {
    recent_window: Duration,
}

impl PeriodReconciler {
    pub fn new(config: &ReconciliationConfig) -> Self {
        Self {
            recent_window: Duration::minutes(config.recent_creation_window_minutes),
        }
    }

    /// Whole minutes between attachment creation and invoice creation
    fn minutes_apart(invoice: &Invoice, cus_product: &FullCusProduct) -> i64 {
        let diff_ms = cus_product.created_at - invoice.created * MILLIS_PER_SECOND;
        Duration::milliseconds(diff_ms).num_minutes().abs()
    }

    /// Trial conversions never bill usage, whatever the billing type
    pub fn check_trial_boundary(&self, subscription: &Subscription) -> PeriodDecision {
        if subscription.is_trial_conversion() {
            return PeriodDecision::Skip(SkipReason::TrialBoundary);
        }
        PeriodDecision::NewPeriod
    }

    /// Guards for usage-in-arrear lines
    pub fn check_usage_in_arrear(
        &self,
        invoice: &Invoice,
        cus_product: &FullCusProduct,
        cus_ent: &CustomerEntitlement,
    ) -> PeriodDecision {
        if Self::minutes_apart(invoice, cus_product) < self.recent_window.num_minutes() {
            return PeriodDecision::Skip(SkipReason::RecentlyAttached);
        }

        if invoice.is_subscription_update() {
            return PeriodDecision::Skip(SkipReason::SubscriptionUpdate);
        }

        let has_surplus = cus_ent.balance.is_some_and(|b| b > Decimal::ZERO);
        if has_surplus && !cus_ent.has_reset_cadence() {
            return PeriodDecision::Skip(SkipReason::LifetimeSurplus);
        }

        PeriodDecision::NewPeriod
    }

    /// Guard for prorated lines: the invoice must start before the new period
    pub fn check_prorated(&self, invoice: &Invoice, subscription: &Subscription) -> PeriodDecision {
        if invoice.period_start == subscription.current_period_start {
            return PeriodDecision::Skip(SkipReason::SamePeriod);
        }
        PeriodDecision::NewPeriod
    }
}

impl Default for PeriodReconciler {
    fn default() -> Self {
        Self::new(&ReconciliationConfig::default())
    }
}

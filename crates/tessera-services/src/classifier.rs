//! Billing-type classification of price configs

use serde::Serialize;
use std::fmt;
use tessera_core::models::{BillWhen, PriceConfig};

/// How a price line is settled against the billing period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingType {
    /// Flat recurring fee
    Flat,
    /// Prepaid quantity billed at period start
    UsageInAdvance,
    /// Metered usage billed when the period closes
    UsageInArrear,
    /// Per-entity usage billed in arrears with mid-period removals credited
    InArrearProrated,
    /// A price shape this service does not recognize
    Unknown,
}

impl fmt::Display for BillingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BillingType::Flat => "flat",
            BillingType::UsageInAdvance => "usage_in_advance",
            BillingType::UsageInArrear => "usage_in_arrear",
            BillingType::InArrearProrated => "in_arrear_prorated",
            BillingType::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl BillingType {
    /// Whether `invoice.created` settles this line
    pub fn settles_at_period_end(&self) -> bool {
        matches!(
            self,
            BillingType::UsageInArrear | BillingType::InArrearProrated
        )
    }
}

/// Classify a price config
pub fn classify(config: &PriceConfig) -> BillingType {
    match config {
        PriceConfig::Fixed(_) => BillingType::Flat,
        PriceConfig::Usage(usage) => match usage.bill_when {
            BillWhen::StartOfPeriod => BillingType::UsageInAdvance,
            BillWhen::EndOfPeriod if usage.should_prorate => BillingType::InArrearProrated,
            BillWhen::EndOfPeriod => BillingType::UsageInArrear,
        },
        PriceConfig::Unknown => BillingType::Unknown,
    }
}

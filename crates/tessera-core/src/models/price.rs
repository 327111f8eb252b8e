//! Catalog price model
//!
//! A price's `config` describes its billing shape. Fixed prices bill a flat
//! amount every cycle; usage prices bill a metered feature either up front
//! or in arrears, in whole `billing_units` increments.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// When usage is billed relative to the billing period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BillWhen {
    /// Prepaid quantity charged at the start of the period
    #[serde(alias = "in_advance")]
    StartOfPeriod,
    /// Consumed quantity charged when the period closes
    #[default]
    #[serde(alias = "in_arrear")]
    EndOfPeriod,
}

/// One tier of a graduated usage price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTier {
    /// Upper bound of the tier in feature units; None means unbounded
    pub to: Option<Decimal>,
    /// Amount charged per `billing_units` block inside this tier
    pub amount: Decimal,
}

/// Flat recurring price
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedPriceConfig {
    pub amount: Decimal,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub stripe_price_id: Option<String>,
}

fn default_billing_units() -> u32 {
    1
}

/// Metered price over a feature
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UsagePriceConfig {
    pub internal_feature_id: String,

    pub feature_id: String,

    #[serde(default)]
    pub bill_when: BillWhen,

    /// Charge proportionally for entities removed mid-period
    #[serde(default)]
    pub should_prorate: bool,

    /// Rounding granularity for reported usage
    #[serde(default = "default_billing_units")]
    #[validate(range(min = 1))]
    pub billing_units: u32,

    #[serde(default)]
    pub usage_tiers: Vec<UsageTier>,

    /// Processor meter receiving aggregate usage
    #[serde(default)]
    pub stripe_meter_id: Option<String>,

    #[serde(default)]
    pub stripe_price_id: Option<String>,

    #[serde(default)]
    pub interval: Option<String>,
}

impl UsagePriceConfig {
    /// Billing units as a Decimal, never below one
    pub fn billing_units(&self) -> Decimal {
        Decimal::from(self.billing_units.max(1))
    }

    /// Round a quantity up to the next whole multiple of `billing_units`
    pub fn round_up_to_units(&self, quantity: Decimal) -> Decimal {
        let units = self.billing_units();
        (quantity / units).ceil() * units
    }

    /// Amount owed for `overage` feature units walked through the tiers
    ///
    /// The overage is first rounded up to whole billing units. Non-positive
    /// overage costs nothing.
    pub fn price_for_overage(&self, overage: Decimal) -> Decimal {
        if overage <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let units = self.billing_units();
        let mut remaining = self.round_up_to_units(overage);
        let mut lower = Decimal::ZERO;
        let mut total = Decimal::ZERO;

        for tier in &self.usage_tiers {
            if remaining <= Decimal::ZERO {
                break;
            }

            let in_tier = match tier.to {
                Some(to) => remaining.min((to - lower).max(Decimal::ZERO)),
                None => remaining,
            };

            total += in_tier / units * tier.amount;
            remaining -= in_tier;
            if let Some(to) = tier.to {
                lower = to;
            }
        }

        total
    }
}

/// Billing shape of a price
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PriceConfig {
    Fixed(FixedPriceConfig),
    Usage(UsagePriceConfig),
    /// A shape this service does not understand
    #[serde(other)]
    Unknown,
}

/// Catalog price belonging to a product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Price {
    pub id: String,

    pub internal_product_id: String,

    pub org_id: String,

    pub config: PriceConfig,

    /// Entitlement this price bills, for usage prices
    pub entitlement_id: Option<String>,

    /// Price created for a single customer rather than the catalog
    #[serde(default)]
    pub is_custom: bool,

    /// Creation time as epoch milliseconds
    pub created_at: i64,
}

impl Price {
    pub fn usage_config(&self) -> Option<&UsagePriceConfig> {
        match &self.config {
            PriceConfig::Usage(config) => Some(config),
            _ => None,
        }
    }
}

//! Entitlement ledger models
//!
//! A catalog `Entitlement` grants an allowance of a feature on an interval.
//! A `CustomerEntitlement` is the customer's running balance against it.
//! Entity-scoped entitlements (per seat, per project) keep one balance per
//! entity in an owned `EntityBalances` map.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::Feature;

/// Reset cadence of an entitlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntInterval {
    Minute,
    Hour,
    Day,
    Week,
    #[default]
    Month,
    Quarter,
    SemiAnnual,
    Year,
    /// Never resets
    Lifetime,
}

impl fmt::Display for EntInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntInterval::Minute => "minute",
            EntInterval::Hour => "hour",
            EntInterval::Day => "day",
            EntInterval::Week => "week",
            EntInterval::Month => "month",
            EntInterval::Quarter => "quarter",
            EntInterval::SemiAnnual => "semi_annual",
            EntInterval::Year => "year",
            EntInterval::Lifetime => "lifetime",
        };
        write!(f, "{}", s)
    }
}

impl EntInterval {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "minute" => Some(EntInterval::Minute),
            "hour" => Some(EntInterval::Hour),
            "day" => Some(EntInterval::Day),
            "week" => Some(EntInterval::Week),
            "month" => Some(EntInterval::Month),
            "quarter" => Some(EntInterval::Quarter),
            "semi_annual" => Some(EntInterval::SemiAnnual),
            "year" => Some(EntInterval::Year),
            "lifetime" => Some(EntInterval::Lifetime),
            _ => None,
        }
    }

    pub fn is_lifetime(&self) -> bool {
        matches!(self, EntInterval::Lifetime)
    }
}

/// Catalog entitlement attached to a product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: String,

    pub internal_feature_id: String,

    /// Joined feature row
    pub feature: Feature,

    /// Units granted per interval (None for unlimited or boolean grants)
    pub allowance: Option<Decimal>,

    pub interval: EntInterval,

    /// Feature id this entitlement is linked to (e.g. seat usage linked to users)
    pub entity_feature_id: Option<String>,
}

/// Per-entity balance held inside an entity-scoped entitlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityBalance {
    pub balance: Decimal,
    #[serde(default)]
    pub adjustment: Decimal,
}

impl EntityBalance {
    pub fn new(balance: Decimal) -> Self {
        Self {
            balance,
            adjustment: Decimal::ZERO,
        }
    }
}

/// Owned map of entity id to that entity's balance
///
/// Ordered so that persisted JSON and log output are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityBalances(BTreeMap<String, EntityBalance>);

impl EntityBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, entity_id: &str) -> Option<&EntityBalance> {
        self.0.get(entity_id)
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.0.contains_key(entity_id)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn insert(&mut self, entity_id: impl Into<String>, balance: EntityBalance) {
        self.0.insert(entity_id.into(), balance);
    }

    /// Sum of the negative entity balances only
    ///
    /// One entity's unused allowance never offsets another entity's overage.
    pub fn total_overage(&self) -> Decimal {
        self.0
            .values()
            .map(|e| e.balance.min(Decimal::ZERO))
            .sum()
    }

    /// Remove the given entity ids, returning how many were present
    ///
    /// Ids that are already absent are ignored, so repeating the call is a no-op.
    pub fn remove_entities<'a, I>(&mut self, entity_ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        entity_ids
            .into_iter()
            .filter(|id| self.0.remove(*id).is_some())
            .count()
    }

    /// Copy of the map with every entity reset to `allowance` and no adjustment
    pub fn reset_to(&self, allowance: Decimal) -> Self {
        Self(
            self.0
                .keys()
                .map(|id| (id.clone(), EntityBalance::new(allowance)))
                .collect(),
        )
    }
}

impl FromIterator<(String, EntityBalance)> for EntityBalances {
    fn from_iter<T: IntoIterator<Item = (String, EntityBalance)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A customer's running balance for one feature of one product attachment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerEntitlement {
    pub id: String,

    pub internal_customer_id: String,

    pub customer_product_id: Option<String>,

    pub internal_feature_id: String,

    pub feature_id: String,

    /// Joined catalog entitlement
    pub entitlement: Entitlement,

    /// Remaining balance; negative means overage, None for unmetered grants
    pub balance: Option<Decimal>,

    /// Manual delta applied outside normal grants
    #[serde(default)]
    pub adjustment: Decimal,

    /// Next reset as epoch milliseconds; None when the entitlement never resets
    pub next_reset_at: Option<i64>,

    /// Per-entity balances for entity-scoped entitlements
    #[serde(default)]
    pub entities: Option<EntityBalances>,
}

impl CustomerEntitlement {
    /// Whether balances are tracked per entity
    pub fn is_entity_scoped(&self) -> bool {
        self.entitlement.entity_feature_id.is_some()
    }

    /// Whether this entitlement is linked to the given feature id
    pub fn is_linked_to(&self, feature_id: &str) -> bool {
        self.entitlement.entity_feature_id.as_deref() == Some(feature_id)
    }

    /// Whether a periodic reset is scheduled
    pub fn has_reset_cadence(&self) -> bool {
        self.next_reset_at.is_some()
    }

    /// Allowance granted each period, zero when unset
    pub fn allowance(&self) -> Decimal {
        self.entitlement.allowance.unwrap_or(Decimal::ZERO)
    }
}

/// Partial update of a customer entitlement row
///
/// `next_reset_at` is doubly optional: `None` leaves the column alone,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerEntitlementUpdate {
    pub balance: Option<Decimal>,
    pub adjustment: Option<Decimal>,
    pub entities: Option<EntityBalances>,
    pub next_reset_at: Option<Option<i64>>,
}

impl CustomerEntitlementUpdate {
    pub fn is_empty(&self) -> bool {
        self.balance.is_none()
            && self.adjustment.is_none()
            && self.entities.is_none()
            && self.next_reset_at.is_none()
    }

    /// Apply the update to an in-memory copy
    pub fn apply_to(&self, cus_ent: &mut CustomerEntitlement) {
        if let Some(balance) = self.balance {
            cus_ent.balance = Some(balance);
        }
        if let Some(adjustment) = self.adjustment {
            cus_ent.adjustment = adjustment;
        }
        if let Some(entities) = &self.entities {
            cus_ent.entities = Some(entities.clone());
        }
        if let Some(next_reset_at) = self.next_reset_at {
            cus_ent.next_reset_at = next_reset_at;
        }
    }
}

//! Entitlement reset engine
//!
//! Planning is pure; persisting is a single ledger update issued after the
//! processor has accepted the usage report.

use rust_decimal::Decimal;
use std::sync::Arc;
use tessera_core::{
    models::{CustomerEntitlement, CustomerEntitlementUpdate, EntityBalances},
    traits::EntitlementRepository,
    AppError, AppResult,
};
use tracing::{error, info, instrument};

use crate::constants::MILLIS_PER_SECOND;
use crate::context::ReconcileContext;

/// Balances an entitlement starts the next period with
#[derive(Debug, Clone, PartialEq)]
pub struct ResetPlan {
    /// Aggregate balance; None for entity-scoped entitlements
    pub balance: Option<Decimal>,
    /// Per-entity balances; None for aggregate entitlements
    pub entities: Option<EntityBalances>,
    pub adjustment: Decimal,
    /// Next reset in epoch milliseconds; stays None without a cadence
    pub next_reset_at: Option<i64>,
}

impl ResetPlan {
    pub fn to_update(&self) -> CustomerEntitlementUpdate {
        CustomerEntitlementUpdate {
            balance: self.balance,
            adjustment: Some(self.adjustment),
            entities: self.entities.clone(),
            next_reset_at: Some(self.next_reset_at),
        }
    }
}

/// Plan the reset of `cus_ent` for the period ending at `period_end` (unix seconds)
pub fn plan_reset(cus_ent: &CustomerEntitlement, period_end: i64) -> ResetPlan {
    let allowance = if cus_ent.entitlement.interval.is_lifetime() {
        Decimal::ZERO
    } else {
        cus_ent.allowance()
    };

    let next_reset_at = cus_ent
        .next_reset_at
        .map(|_| period_end * MILLIS_PER_SECOND);

    match cus_ent.entities.as_ref().filter(|_| cus_ent.is_entity_scoped()) {
        Some(entities) => ResetPlan {
            balance: None,
            entities: Some(entities.reset_to(allowance)),
            adjustment: Decimal::ZERO,
            next_reset_at,
        },
        None => ResetPlan {
            balance: Some(allowance),
            entities: None,
            adjustment: Decimal::ZERO,
            next_reset_at,
        },
    }
}

/// Persists reset plans to the ledger
pub struct ResetEngine {
    entitlements: Arc<dyn EntitlementRepository>,
}

impl ResetEngine {
    pub fn new(entitlements: Arc<dyn EntitlementRepository>) -> Self {
        Self { entitlements }
    }

    /// Write a reset that follows an accepted usage report
    ///
    /// The processor already holds the usage at this point, so a failure
    /// here needs manual reconciliation and is logged as such.
    #[instrument(skip_all, parent = &ctx.span, fields(cus_ent_id = %cus_ent.id))]
    pub async fn apply(
        &self,
        ctx: &ReconcileContext,
        cus_ent: &CustomerEntitlement,
        plan: &ResetPlan,
    ) -> AppResult<()> {
        let rows = match self.entitlements.update(&cus_ent.id, &plan.to_update()).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(
                    feature_id = %cus_ent.feature_id,
                    customer_id = %cus_ent.internal_customer_id,
                    "Usage reported but reset failed, manual reconciliation required: {}",
                    e
                );
                return Err(e);
            }
        };

        if rows == 0 {
            error!(
                feature_id = %cus_ent.feature_id,
                "Usage reported but entitlement {} no longer exists, manual reconciliation required",
                cus_ent.id
            );
            return Err(AppError::EntitlementNotFound(cus_ent.id.clone()));
        }

        info!(
            feature_id = %cus_ent.feature_id,
            next_reset_at = ?plan.next_reset_at,
            "Reset balance and adjustment"
        );
        Ok(())
    }
}

//! Prorated-arrear deletion handler
//!
//! Entities removed mid-period are soft-deleted. When the period closes
//! they are unlinked from every entitlement tracking them, purged, and the
//! seat they held is credited back to the metered balance.

use rust_decimal::Decimal;
use std::sync::Arc;
use tessera_core::{
    models::{CustomerEntitlement, Entity, Invoice, Subscription, UsagePriceConfig},
    traits::{EntitlementRepository, EntityRepository},
    AppResult,
};
use tracing::{debug, info, instrument, warn};

use crate::context::ReconcileContext;
use crate::period::{PeriodDecision, PeriodReconciler, SkipReason};

/// What a settlement changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeletionSettlement {
    /// Soft-deleted entities found for the feature
    pub deleted: usize,
    /// Linked entitlements whose entity map shrank
    pub unlinked_from: usize,
    /// Entity rows physically removed
    pub purged: u64,
    /// Amount added back to the metered balance
    pub credited: Decimal,
}

/// Result of handling one prorated price line
#[derive(Debug, Clone, PartialEq)]
pub enum ProratedOutcome {
    Settled(DeletionSettlement),
    Skipped(SkipReason),
}

/// Key of an entity inside an entitlement's entity map
fn entity_key(entity: &Entity) -> &str {
    entity.id.as_deref().unwrap_or(&entity.internal_id)
}

pub struct ProratedDeletionHandler {
    entitlements: Arc<dyn EntitlementRepository>,
    entities: Arc<dyn EntityRepository>,
    period: PeriodReconciler,
}

impl ProratedDeletionHandler {
    pub fn new(
        entitlements: Arc<dyn EntitlementRepository>,
        entities: Arc<dyn EntityRepository>,
        period: PeriodReconciler,
    ) -> Self {
        Self {
            entitlements,
            entities,
            period,
        }
    }

    /// Settle deletions for one in-arrear prorated price line
    ///
    /// `cus_ents` are all entitlements of the attachment; `metered` is the
    /// one the price bills. Safe to re-run: purged entities are no longer
    /// listed and unlinking an absent key is a miss.
    #[instrument(
        skip_all,
        parent = &ctx.span,
        fields(feature_id = %config.feature_id, cus_ent_id = %metered.id)
    )]
    pub async fn settle(
        &self,
        ctx: &ReconcileContext,
        invoice: &Invoice,
        subscription: &Subscription,
        config: &UsagePriceConfig,
        metered: &CustomerEntitlement,
        cus_ents: &[CustomerEntitlement],
    ) -> AppResult<ProratedOutcome> {
        if let PeriodDecision::Skip(reason) = self.period.check_prorated(invoice, subscription) {
            debug!(%reason, "Invoice does not open a new period");
            return Ok(ProratedOutcome::Skipped(reason));
        }

        let deleted = self
            .entities
            .list_deleted(&metered.internal_customer_id, &config.internal_feature_id)
            .await?;

        if deleted.is_empty() {
            debug!("No deleted entities to settle");
            return Ok(ProratedOutcome::Skipped(SkipReason::NoDeletedEntities));
        }

        let keys: Vec<&str> = deleted.iter().map(entity_key).collect();
        let mut settlement = DeletionSettlement {
            deleted: deleted.len(),
            ..Default::default()
        };

        for cus_ent in cus_ents.iter().filter(|ce| ce.is_linked_to(&config.feature_id)) {
            let Some(mut entities) = cus_ent.entities.clone() else {
                continue;
            };

            let present: Vec<String> = keys
                .iter()
                .filter(|k| entities.contains(k))
                .map(|k| k.to_string())
                .collect();
            if present.is_empty() {
                continue;
            }

            let removed = entities.remove_entities(present.iter().map(String::as_str));
            self.entitlements.delete_entities(&cus_ent.id, &present).await?;
            settlement.unlinked_from += 1;

            debug!(
                cus_ent_id = %cus_ent.id,
                removed,
                remaining = entities.len(),
                "Unlinked deleted entities"
            );
        }

        let internal_ids: Vec<String> = deleted.iter().map(|e| e.internal_id.clone()).collect();
        settlement.purged = self.entities.purge(&internal_ids).await?;

        if metered.balance.is_some() {
            let credit = Decimal::from(deleted.len());
            let rows = self.entitlements.increment_balance(&metered.id, credit).await?;
            if rows == 0 {
                warn!("Metered entitlement {} has no balance to credit", metered.id);
            } else {
                settlement.credited = credit;
            }
        }

        info!(
            customer_id = %metered.internal_customer_id,
            deleted = settlement.deleted,
            unlinked_from = settlement.unlinked_from,
            purged = settlement.purged,
            credited = %settlement.credited,
            "Settled deleted entities"
        );

        Ok(ProratedOutcome::Settled(settlement))
    }
}

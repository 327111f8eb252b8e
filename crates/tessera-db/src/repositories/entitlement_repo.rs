//! Customer entitlement repository implementation
//!
//! Balance increments and entity-map removals run as single SQL statements
//! so concurrent webhook deliveries never overwrite each other's writes.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tessera_core::{
    models::{
        CustomerEntitlement, CustomerEntitlementUpdate, EntInterval, Entitlement, EntityBalances,
        Feature, FeatureDisplay,
    },
    traits::EntitlementRepository,
    AppError, AppResult,
};
use tracing::{debug, error, instrument};

/// Customer entitlement joined with its catalog entitlement and feature
#[derive(Debug, FromRow)]
pub(crate) struct CustomerEntitlementRow {
    pub id: String,
    pub internal_customer_id: String,
    pub customer_product_id: Option<String>,
    pub internal_feature_id: String,
    pub feature_id: String,
    pub balance: Option<Decimal>,
    pub adjustment: Decimal,
    pub next_reset_at: Option<i64>,
    pub entities: Option<Json<EntityBalances>>,
    pub entitlement_id: String,
    pub allowance: Option<Decimal>,
    pub interval: String,
    pub entity_feature_id: Option<String>,
    pub feature_name: String,
    pub feature_org_id: String,
    pub feature_display: Option<Json<FeatureDisplay>>,
}

/// Parse a stored interval, rejecting values this service does not know
///
/// A misread lifetime entitlement would otherwise be reset every period.
pub(crate) fn parse_interval(owner_id: &str, interval: &str) -> AppResult<EntInterval> {
    EntInterval::from_str(interval).ok_or_else(|| {
        error!("Entitlement {} has unrecognised interval {:?}", owner_id, interval);
        AppError::Database(format!(
            "Unrecognised interval '{}' on entitlement {}",
            interval, owner_id
        ))
    })
}

impl TryFrom<CustomerEntitlementRow> for CustomerEntitlement {
    type Error = AppError;

    fn try_from(row: CustomerEntitlementRow) -> Result<Self, Self::Error> {
        let interval = parse_interval(&row.id, &row.interval)?;

        let feature = Feature {
            internal_id: row.internal_feature_id.clone(),
            id: row.feature_id.clone(),
            name: row.feature_name,
            org_id: row.feature_org_id,
            display: row.feature_display.map(|d| d.0),
        };

        Ok(CustomerEntitlement {
            id: row.id,
            internal_customer_id: row.internal_customer_id,
            customer_product_id: row.customer_product_id,
            internal_feature_id: row.internal_feature_id.clone(),
            feature_id: row.feature_id,
            entitlement: Entitlement {
                id: row.entitlement_id,
                internal_feature_id: row.internal_feature_id,
                feature,
                allowance: row.allowance,
                interval,
                entity_feature_id: row.entity_feature_id,
            },
            balance: row.balance,
            adjustment: row.adjustment,
            next_reset_at: row.next_reset_at,
            entities: row.entities.map(|e| e.0),
        })
    }
}

/// Shared SELECT for customer entitlement rows; callers append a WHERE clause
pub(crate) const CUSTOMER_ENTITLEMENT_SELECT: &str = r#"
    SELECT
        ce.id, ce.internal_customer_id, ce.customer_product_id,
        ce.internal_feature_id, ce.feature_id,
        ce.balance, ce.adjustment, ce.next_reset_at, ce.entities,
        e.id AS entitlement_id, e.allowance, e.interval, e.entity_feature_id,
        f.name AS feature_name, f.org_id AS feature_org_id, f.display AS feature_display
    FROM customer_entitlements ce
    JOIN entitlements e ON e.id = ce.entitlement_id
    JOIN features f ON f.internal_id = ce.internal_feature_id
"#;

/// PostgreSQL implementation of EntitlementRepository
pub struct PgEntitlementRepository {
    pool: PgPool,
}

impl PgEntitlementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntitlementRepository for PgEntitlementRepository {
    #[instrument(skip(self))]
    async fn find(
        &self,
        internal_customer_id: &str,
        internal_feature_id: &str,
    ) -> AppResult<Option<CustomerEntitlement>> {
        debug!(
            "Finding entitlement for customer {} feature {}",
            internal_customer_id, internal_feature_id
        );

        let sql = format!(
            "{} WHERE ce.internal_customer_id = $1 AND ce.internal_feature_id = $2 LIMIT 1",
            CUSTOMER_ENTITLEMENT_SELECT
        );
        let result = sqlx::query_as::<sqlx::Postgres, CustomerEntitlementRow>(&sql)
            .bind(internal_customer_id)
            .bind(internal_feature_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!(
                    "Database error finding entitlement for customer {}: {}",
                    internal_customer_id, e
                );
                AppError::Database(format!("Failed to find entitlement: {}", e))
            })?;

        result.map(CustomerEntitlement::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: &str) -> AppResult<Option<CustomerEntitlement>> {
        debug!("Finding entitlement by id: {}", id);

        let sql = format!("{} WHERE ce.id = $1", CUSTOMER_ENTITLEMENT_SELECT);
        let result = sqlx::query_as::<sqlx::Postgres, CustomerEntitlementRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding entitlement {}: {}", id, e);
                AppError::Database(format!("Failed to find entitlement: {}", e))
            })?;

        result.map(CustomerEntitlement::try_from).transpose()
    }

    #[instrument(skip(self, update))]
    async fn update(&self, id: &str, update: &CustomerEntitlementUpdate) -> AppResult<u64> {
        if update.is_empty() {
            return Ok(0);
        }

        debug!("Updating entitlement {}", id);

        let result = sqlx::query(
            r#"
            UPDATE customer_entitlements
            SET
                balance = COALESCE($2, balance),
                adjustment = COALESCE($3, adjustment),
                entities = COALESCE($4, entities),
                next_reset_at = CASE WHEN $5 THEN $6 ELSE next_reset_at END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.balance)
        .bind(update.adjustment)
        .bind(update.entities.as_ref().map(Json))
        .bind(update.next_reset_at.is_some())
        .bind(update.next_reset_at.flatten())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error updating entitlement {}: {}", id, e);
            AppError::Database(format!("Failed to update entitlement: {}", e))
        })?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn increment_balance(&self, id: &str, delta: Decimal) -> AppResult<u64> {
        debug!("Incrementing balance of entitlement {} by {}", id, delta);

        let result = sqlx::query(
            r#"
            UPDATE customer_entitlements
            SET balance = balance + $2
            WHERE id = $1 AND balance IS NOT NULL
            "#,
        )
        .bind(id)
        .bind(delta)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error incrementing entitlement {}: {}", id, e);
            AppError::Database(format!("Failed to increment balance: {}", e))
        })?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn delete_entities(&self, id: &str, entity_ids: &[String]) -> AppResult<u64> {
        if entity_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE customer_entitlements
            SET entities = entities - $2::text[]
            WHERE id = $1 AND entities IS NOT NULL
            "#,
        )
        .bind(id)
        .bind(entity_ids)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Database error removing entities from entitlement {}: {}",
                id, e
            );
            AppError::Database(format!("Failed to remove entities: {}", e))
        })?;

        Ok(result.rows_affected())
    }
}

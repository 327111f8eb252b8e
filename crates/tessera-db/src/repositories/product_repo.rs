//! Product catalog repository implementation
//!
//! Prices keep their billing shape in a JSONB `config` column. Shapes this
//! service cannot parse load as `PriceConfig::Unknown` instead of failing the
//! whole query, so classification can report them.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tessera_core::{
    models::{AppEnv, Entitlement, Feature, FeatureDisplay, FullProduct, Price, PriceConfig},
    traits::ProductRepository,
    AppError, AppResult,
};
use tracing::{debug, error, instrument, warn};

use super::entitlement_repo::parse_interval;

/// Database row representation of a price
#[derive(Debug, FromRow)]
pub(crate) struct PriceRow {
    pub id: String,
    pub internal_product_id: String,
    pub org_id: String,
    pub config: Json<serde_json::Value>,
    pub entitlement_id: Option<String>,
    pub is_custom: bool,
    pub created_at: i64,
}

impl From<PriceRow> for Price {
    fn from(row: PriceRow) -> Self {
        let config = serde_json::from_value::<PriceConfig>(row.config.0).unwrap_or_else(|e| {
            warn!("Price {} has an unreadable config: {}", row.id, e);
            PriceConfig::Unknown
        });

        Price {
            id: row.id,
            internal_product_id: row.internal_product_id,
            org_id: row.org_id,
            config,
            entitlement_id: row.entitlement_id,
            is_custom: row.is_custom,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ProductRow {
    internal_id: String,
    id: String,
    name: String,
    org_id: String,
    version: i32,
}

/// Catalog entitlement joined with its feature
#[derive(Debug, FromRow)]
struct EntitlementRow {
    id: String,
    internal_feature_id: String,
    allowance: Option<Decimal>,
    interval: String,
    entity_feature_id: Option<String>,
    feature_id: String,
    feature_name: String,
    feature_org_id: String,
    feature_display: Option<Json<FeatureDisplay>>,
}

impl TryFrom<EntitlementRow> for Entitlement {
    type Error = AppError;

    fn try_from(row: EntitlementRow) -> Result<Self, Self::Error> {
        let interval = parse_interval(&row.id, &row.interval)?;

        Ok(Entitlement {
            id: row.id,
            internal_feature_id: row.internal_feature_id.clone(),
            feature: Feature {
                internal_id: row.internal_feature_id,
                id: row.feature_id,
                name: row.feature_name,
                org_id: row.feature_org_id,
                display: row.feature_display.map(|d| d.0),
            },
            allowance: row.allowance,
            interval,
            entity_feature_id: row.entity_feature_id,
        })
    }
}

/// PostgreSQL implementation of ProductRepository
pub struct PgProductRepository {
    pool: PgPool,
}

impl PgProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn list_prices(&self, internal_product_id: &str) -> AppResult<Vec<Price>> {
        let rows = sqlx::query_as::<sqlx::Postgres, PriceRow>(
            r#"
            SELECT
                p.id, p.internal_product_id, p.org_id, p.config,
                p.entitlement_id, p.is_custom, p.created_at
            FROM prices p
            WHERE p.internal_product_id = $1 AND p.is_custom = FALSE
            ORDER BY p.created_at
            "#,
        )
        .bind(internal_product_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Database error listing prices for product {}: {}",
                internal_product_id, e
            );
            AppError::Database(format!("Failed to list product prices: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_entitlements(&self, internal_product_id: &str) -> AppResult<Vec<Entitlement>> {
        let rows = sqlx::query_as::<sqlx::Postgres, EntitlementRow>(
            r#"
            SELECT
                e.id, e.internal_feature_id, e.allowance, e.interval, e.entity_feature_id,
                f.id AS feature_id, f.name AS feature_name, f.org_id AS feature_org_id,
                f.display AS feature_display
            FROM entitlements e
            JOIN features f ON f.internal_id = e.internal_feature_id
            WHERE e.internal_product_id = $1 AND e.is_custom = FALSE
            ORDER BY e.id
            "#,
        )
        .bind(internal_product_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Database error listing entitlements for product {}: {}",
                internal_product_id, e
            );
            AppError::Database(format!("Failed to list product entitlements: {}", e))
        })?;

        rows.into_iter().map(Entitlement::try_from).collect()
    }
}

#[async_trait]
impl ProductRepository for PgProductRepository {
    #[instrument(skip(self))]
    async fn find_full(
        &self,
        internal_id: &str,
        org_id: &str,
        env: AppEnv,
    ) -> AppResult<Option<FullProduct>> {
        debug!("Loading product {} for org {} ({})", internal_id, org_id, env);

        let row = sqlx::query_as::<sqlx::Postgres, ProductRow>(
            r#"
            SELECT internal_id, id, name, org_id, version
            FROM products
            WHERE internal_id = $1 AND org_id = $2 AND env = $3
            "#,
        )
        .bind(internal_id)
        .bind(org_id)
        .bind(env.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding product {}: {}", internal_id, e);
            AppError::Database(format!("Failed to find product: {}", e))
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let prices = self.list_prices(&row.internal_id).await?;
        let entitlements = self.list_entitlements(&row.internal_id).await?;

        Ok(Some(FullProduct {
            internal_id: row.internal_id,
            id: row.id,
            name: row.name,
            org_id: row.org_id,
            env,
            version: row.version,
            prices,
            entitlements,
        }))
    }
}

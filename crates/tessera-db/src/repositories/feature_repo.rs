//! Feature repository implementation

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tessera_core::{
    models::{AppEnv, Feature, FeatureDisplay},
    traits::FeatureRepository,
    AppError, AppResult,
};
use tracing::{debug, error, instrument};

/// Database row representation of a feature
#[derive(Debug, FromRow)]
pub(crate) struct FeatureRow {
    pub internal_id: String,
    pub id: String,
    pub name: String,
    pub org_id: String,
    pub display: Option<Json<FeatureDisplay>>,
}

impl From<FeatureRow> for Feature {
    fn from(row: FeatureRow) -> Self {
        Feature {
            internal_id: row.internal_id,
            id: row.id,
            name: row.name,
            org_id: row.org_id,
            display: row.display.map(|d| d.0),
        }
    }
}

/// PostgreSQL implementation of FeatureRepository
pub struct PgFeatureRepository {
    pool: PgPool,
}

impl PgFeatureRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeatureRepository for PgFeatureRepository {
    #[instrument(skip(self))]
    async fn list(&self, org_id: &str, env: AppEnv) -> AppResult<Vec<Feature>> {
        debug!("Listing features for org {} ({})", org_id, env);

        let rows = sqlx::query_as::<sqlx::Postgres, FeatureRow>(
            r#"
            SELECT internal_id, id, name, org_id, display
            FROM features
            WHERE org_id = $1 AND env = $2
            ORDER BY id
            "#,
        )
        .bind(org_id)
        .bind(env.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error listing features for org {}: {}", org_id, e);
            AppError::Database(format!("Failed to list features: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

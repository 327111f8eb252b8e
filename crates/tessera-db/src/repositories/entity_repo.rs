//! Entity repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tessera_core::{
    models::{AppEnv, Entity},
    traits::EntityRepository,
    AppError, AppResult,
};
use tracing::{debug, error, info, instrument};

#[derive(Debug, FromRow)]
struct EntityRow {
    internal_id: String,
    id: Option<String>,
    name: Option<String>,
    internal_customer_id: String,
    internal_feature_id: String,
    feature_id: String,
    deleted: bool,
    created_at: DateTime<Utc>,
}

impl From<EntityRow> for Entity {
    fn from(row: EntityRow) -> Self {
        Entity {
            internal_id: row.internal_id,
            id: row.id,
            name: row.name,
            internal_customer_id: row.internal_customer_id,
            internal_feature_id: row.internal_feature_id,
            feature_id: row.feature_id,
            deleted: row.deleted,
            created_at: row.created_at,
        }
    }
}

/// PostgreSQL implementation of EntityRepository
pub struct PgEntityRepository {
    pool: PgPool,
}

impl PgEntityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityRepository for PgEntityRepository {
    #[instrument(skip(self))]
    async fn list_deleted(
        &self,
        internal_customer_id: &str,
        internal_feature_id: &str,
    ) -> AppResult<Vec<Entity>> {
        debug!(
            "Listing deleted entities for customer {} feature {}",
            internal_customer_id, internal_feature_id
        );

        let rows = sqlx::query_as::<sqlx::Postgres, EntityRow>(
            r#"
            SELECT
                internal_id, id, name, internal_customer_id,
                internal_feature_id, feature_id, deleted, created_at
            FROM entities
            WHERE internal_customer_id = $1
              AND internal_feature_id = $2
              AND deleted = TRUE
            ORDER BY created_at
            "#,
        )
        .bind(internal_customer_id)
        .bind(internal_feature_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Database error listing deleted entities for customer {}: {}",
                internal_customer_id, e
            );
            AppError::Database(format!("Failed to list deleted entities: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn find_by_internal_id(
        &self,
        internal_id: &str,
        org_id: &str,
        env: AppEnv,
    ) -> AppResult<Option<Entity>> {
        let result = sqlx::query_as::<sqlx::Postgres, EntityRow>(
            r#"
            SELECT
                internal_id, id, name, internal_customer_id,
                internal_feature_id, feature_id, deleted, created_at
            FROM entities
            WHERE internal_id = $1 AND org_id = $2 AND env = $3
            "#,
        )
        .bind(internal_id)
        .bind(org_id)
        .bind(env.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding entity {}: {}", internal_id, e);
            AppError::Database(format!("Failed to find entity: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn purge(&self, internal_ids: &[String]) -> AppResult<u64> {
        if internal_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM entities WHERE internal_id = ANY($1)")
            .bind(internal_ids)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error purging entities: {}", e);
                AppError::Database(format!("Failed to purge entities: {}", e))
            })?;

        info!("Purged {} entities", result.rows_affected());
        Ok(result.rows_affected())
    }
}

//! Organization repository implementation

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tessera_core::{
    models::{Organization, ProcessorKeys},
    traits::OrganizationRepository,
    AppError, AppResult,
};
use tracing::{debug, error, instrument};

#[derive(Debug, FromRow)]
struct OrganizationRow {
    id: String,
    slug: String,
    name: String,
    test_secret_key: Option<String>,
    live_secret_key: Option<String>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Organization {
            id: row.id,
            slug: row.slug,
            name: row.name,
            processor_keys: ProcessorKeys {
                test_secret_key: row.test_secret_key,
                live_secret_key: row.live_secret_key,
            },
        }
    }
}

/// PostgreSQL implementation of OrganizationRepository
pub struct PgOrganizationRepository {
    pool: PgPool,
}

impl PgOrganizationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrganizationRepository for PgOrganizationRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: &str) -> AppResult<Option<Organization>> {
        debug!("Finding organization by id: {}", id);

        let result = sqlx::query_as::<sqlx::Postgres, OrganizationRow>(
            r#"
            SELECT id, slug, name, test_secret_key, live_secret_key
            FROM organizations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding organization {}: {}", id, e);
            AppError::Database(format!("Failed to find organization: {}", e))
        })?;

        Ok(result.map(Into::into))
    }
}

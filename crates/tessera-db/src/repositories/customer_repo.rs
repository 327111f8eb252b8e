//! Customer repository implementation

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tessera_core::{
    models::{AppEnv, Customer},
    traits::CustomerRepository,
    AppError, AppResult,
};
use tracing::{debug, error, instrument};

#[derive(Debug, FromRow)]
struct CustomerRow {
    internal_id: String,
    id: Option<String>,
    name: Option<String>,
    email: Option<String>,
    processor_id: Option<String>,
    org_id: String,
}

impl CustomerRow {
    fn into_customer(self, env: AppEnv) -> Customer {
        Customer {
            internal_id: self.internal_id,
            id: self.id,
            name: self.name,
            email: self.email,
            processor_id: self.processor_id,
            org_id: self.org_id,
            env,
        }
    }
}

/// PostgreSQL implementation of CustomerRepository
pub struct PgCustomerRepository {
    pool: PgPool,
}

impl PgCustomerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerRepository for PgCustomerRepository {
    #[instrument(skip(self, internal_ids), fields(count = internal_ids.len()))]
    async fn list_by_internal_ids(
        &self,
        org_id: &str,
        env: AppEnv,
        internal_ids: &[String],
    ) -> AppResult<Vec<Customer>> {
        if internal_ids.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Loading {} customers for org {} ({})", internal_ids.len(), org_id, env);

        let rows = sqlx::query_as::<sqlx::Postgres, CustomerRow>(
            r#"
            SELECT internal_id, id, name, email, processor_id, org_id
            FROM customers
            WHERE org_id = $1 AND env = $2 AND internal_id = ANY($3)
            ORDER BY internal_id
            "#,
        )
        .bind(org_id)
        .bind(env.to_string())
        .bind(internal_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading customers of org {}: {}", org_id, e);
            AppError::Database(format!("Failed to load customers: {}", e))
        })?;

        Ok(rows.into_iter().map(|row| row.into_customer(env)).collect())
    }
}

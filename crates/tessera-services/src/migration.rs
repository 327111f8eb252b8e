//! Customer plan migration
//!
//! Moves customers from one product version to another. Each customer is
//! migrated independently; a failure is logged against the job and the
//! batch carries on.

use futures::{stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tessera_core::{
    models::{AppEnv, Customer, FullProduct},
    traits::CustomerProductRepository,
    AppResult,
};
use tracing::{error, info, instrument};

use crate::constants::MIGRATION_CONCURRENCY;

/// A batch migration request
#[derive(Debug, Clone, Serialize)]
pub struct MigrationJob {
    pub id: String,
    pub org_id: String,
    pub env: AppEnv,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Internal ids of customers that failed to migrate
    pub failed_customers: Vec<String>,
}

pub struct MigrationService {
    cus_products: Arc<dyn CustomerProductRepository>,
    concurrency: usize,
}

impl MigrationService {
    pub fn new(cus_products: Arc<dyn CustomerProductRepository>) -> Self {
        Self {
            cus_products,
            concurrency: MIGRATION_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    async fn migrate_attachments(
        &self,
        customer: &Customer,
        from_product: &FullProduct,
        to_product: &FullProduct,
    ) -> AppResult<usize> {
        let attachments = self
            .cus_products
            .list_by_customer_and_product(&customer.internal_id, &from_product.internal_id)
            .await?;

        for cus_product in &attachments {
            self.cus_products
                .migrate_attachment(&cus_product.id, to_product)
                .await?;
        }

        Ok(attachments.len())
    }

    /// Migrate one customer, returning whether it succeeded
    #[instrument(
        skip_all,
        fields(
            job_id = %job.id,
            customer_id = %customer.internal_id,
            from = %from_product.id,
            to = %to_product.id
        )
    )]
    pub async fn migrate_customer(
        &self,
        job: &MigrationJob,
        customer: &Customer,
        from_product: &FullProduct,
        to_product: &FullProduct,
    ) -> bool {
        match self.migrate_attachments(customer, from_product, to_product).await {
            Ok(count) => {
                info!(
                    "Migrated {} attachment(s) of {} from v{} to v{}",
                    count,
                    customer.display_name(),
                    from_product.version,
                    to_product.version
                );
                true
            }
            Err(e) => {
                error!(
                    org_id = %job.org_id,
                    env = %job.env,
                    "Failed to migrate customer {} in job {}: {}",
                    customer.display_name(),
                    job.id,
                    e
                );
                false
            }
        }
    }

    /// Migrate a batch of customers
    #[instrument(skip_all, fields(job_id = %job.id, customers = customers.len()))]
    pub async fn migrate_customers(
        &self,
        job: &MigrationJob,
        customers: &[Customer],
        from_product: &FullProduct,
        to_product: &FullProduct,
    ) -> MigrationSummary {
        let results: Vec<(&Customer, bool)> = stream::iter(customers)
            .map(|customer| async move {
                let ok = self
                    .migrate_customer(job, customer, from_product, to_product)
                    .await;
                (customer, ok)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = MigrationSummary::default();
        for (customer, ok) in results {
            if ok {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
                summary.failed_customers.push(customer.internal_id.clone());
            }
        }
        summary.failed_customers.sort();

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Migration batch finished"
        );
        summary
    }
}

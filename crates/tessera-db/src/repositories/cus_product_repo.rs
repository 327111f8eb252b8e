//! Customer product repository implementation
//!
//! Customer products are read with their customer joined in. Migration to a
//! new product version runs in one transaction so a failure leaves the
//! attachment on its old version.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tessera_core::{
    models::{
        AppEnv, CusProductLedger, CusProductStatus, Customer, CustomerEntitlement, CustomerPrice,
        FullCusProduct, FullProduct,
    },
    traits::CustomerProductRepository,
    AppError, AppResult,
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::entitlement_repo::{CustomerEntitlementRow, CUSTOMER_ENTITLEMENT_SELECT};
use super::product_repo::PriceRow;

#[derive(Debug, FromRow)]
struct CusProductRow {
    id: String,
    internal_customer_id: String,
    internal_product_id: String,
    product_id: String,
    created_at: i64,
    status: String,
    subscription_ids: Vec<String>,
    internal_entity_id: Option<String>,
    customer_id: Option<String>,
    customer_name: Option<String>,
    customer_email: Option<String>,
    customer_processor_id: Option<String>,
    org_id: String,
    env: String,
}

impl From<CusProductRow> for FullCusProduct {
    fn from(row: CusProductRow) -> Self {
        FullCusProduct {
            id: row.id,
            internal_customer_id: row.internal_customer_id.clone(),
            customer: Customer {
                internal_id: row.internal_customer_id,
                id: row.customer_id,
                name: row.customer_name,
                email: row.customer_email,
                processor_id: row.customer_processor_id,
                org_id: row.org_id,
                env: AppEnv::from_str(&row.env).unwrap_or_default(),
            },
            internal_product_id: row.internal_product_id,
            product_id: row.product_id,
            created_at: row.created_at,
            status: CusProductStatus::from_str(&row.status),
            subscription_ids: row.subscription_ids,
            internal_entity_id: row.internal_entity_id,
        }
    }
}

#[derive(Debug, FromRow)]
struct CustomerPriceRow {
    customer_price_id: String,
    customer_product_id: String,
    #[sqlx(flatten)]
    price: PriceRow,
}

const CUS_PRODUCT_SELECT: &str = r#"
    SELECT
        cp.id, cp.internal_customer_id, cp.internal_product_id, cp.product_id,
        cp.created_at, cp.status, cp.subscription_ids, cp.internal_entity_id,
        c.id AS customer_id, c.name AS customer_name, c.email AS customer_email,
        c.processor_id AS customer_processor_id, c.org_id, c.env
    FROM customer_products cp
    JOIN customers c ON c.internal_id = cp.internal_customer_id
"#;

/// PostgreSQL implementation of CustomerProductRepository
pub struct PgCustomerProductRepository {
    pool: PgPool,
}

impl PgCustomerProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        cus_product_id: &str,
    ) -> AppResult<Option<FullCusProduct>> {
        let sql = format!("{} WHERE cp.id = $1", CUS_PRODUCT_SELECT);
        let row = sqlx::query_as::<sqlx::Postgres, CusProductRow>(&sql)
            .bind(cus_product_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| {
                error!("Database error finding customer product {}: {}", cus_product_id, e);
                AppError::Database(format!("Failed to find customer product: {}", e))
            })?;

        Ok(row.map(Into::into))
    }

    /// Re-point existing customer entitlements at the new product's entitlements
    ///
    /// Consumption carries over: the balance moves by the change in allowance.
    /// Entitlements the new version drops are removed; new ones start full.
    async fn migrate_entitlements(
        tx: &mut Transaction<'_, Postgres>,
        cus_product: &FullCusProduct,
        to_product: &FullProduct,
    ) -> AppResult<()> {
        let sql = format!(
            "{} WHERE ce.customer_product_id = $1",
            CUSTOMER_ENTITLEMENT_SELECT
        );
        let existing = sqlx::query_as::<sqlx::Postgres, CustomerEntitlementRow>(&sql)
            .bind(&cus_product.id)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| {
                error!("Database error loading entitlements of {}: {}", cus_product.id, e);
                AppError::Database(format!("Failed to load entitlements: {}", e))
            })?;

        let next_reset_at = existing.iter().filter_map(|row| row.next_reset_at).max();

        for row in &existing {
            let target = to_product
                .entitlements
                .iter()
                .find(|ent| ent.internal_feature_id == row.internal_feature_id);

            match target {
                Some(ent) => {
                    let delta = ent.allowance.unwrap_or(Decimal::ZERO)
                        - row.allowance.unwrap_or(Decimal::ZERO);

                    sqlx::query(
                        r#"
                        UPDATE customer_entitlements
                        SET entitlement_id = $2,
                            balance = CASE WHEN balance IS NULL THEN NULL ELSE balance + $3 END
                        WHERE id = $1
                        "#,
                    )
                    .bind(&row.id)
                    .bind(&ent.id)
                    .bind(delta)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| {
                        error!("Database error migrating entitlement {}: {}", row.id, e);
                        AppError::Database(format!("Failed to migrate entitlement: {}", e))
                    })?;
                }
                None => {
                    debug!("Dropping entitlement {} absent from new version", row.id);
                    sqlx::query("DELETE FROM customer_entitlements WHERE id = $1")
                        .bind(&row.id)
                        .execute(&mut **tx)
                        .await
                        .map_err(|e| {
                            error!("Database error deleting entitlement {}: {}", row.id, e);
                            AppError::Database(format!("Failed to delete entitlement: {}", e))
                        })?;
                }
            }
        }

        for ent in to_product.entitlements.iter().filter(|ent| {
            !existing
                .iter()
                .any(|row| row.internal_feature_id == ent.internal_feature_id)
        }) {
            let reset_at = if ent.interval.is_lifetime() {
                None
            } else {
                next_reset_at
            };

            sqlx::query(
                r#"
                INSERT INTO customer_entitlements (
                    id, internal_customer_id, customer_product_id, entitlement_id,
                    internal_feature_id, feature_id, balance, adjustment, next_reset_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&cus_product.internal_customer_id)
            .bind(&cus_product.id)
            .bind(&ent.id)
            .bind(&ent.internal_feature_id)
            .bind(&ent.feature.id)
            .bind(ent.allowance)
            .bind(reset_at)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                error!("Database error adding entitlement {}: {}", ent.id, e);
                AppError::Database(format!("Failed to add entitlement: {}", e))
            })?;
        }

        Ok(())
    }
}

#[async_trait]
impl CustomerProductRepository for PgCustomerProductRepository {
    #[instrument(skip(self))]
    async fn list_by_subscription(
        &self,
        subscription_id: &str,
        org_id: &str,
        env: AppEnv,
        statuses: &[CusProductStatus],
    ) -> AppResult<Vec<FullCusProduct>> {
        debug!("Listing customer products for subscription {}", subscription_id);

        let statuses: Vec<String> = statuses.iter().map(ToString::to_string).collect();
        let sql = format!(
            r#"
            {}
            WHERE $1 = ANY(cp.subscription_ids)
              AND c.org_id = $2
              AND c.env = $3
              AND cp.status = ANY($4)
            ORDER BY cp.created_at
            "#,
            CUS_PRODUCT_SELECT
        );

        let rows = sqlx::query_as::<sqlx::Postgres, CusProductRow>(&sql)
            .bind(subscription_id)
            .bind(org_id)
            .bind(env.to_string())
            .bind(&statuses)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!(
                    "Database error listing customer products for {}: {}",
                    subscription_id, e
                );
                AppError::Database(format!("Failed to list customer products: {}", e))
            })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn get_entitlements_and_prices(&self, cus_product_id: &str) -> AppResult<CusProductLedger> {
        let sql = format!(
            "{} WHERE ce.customer_product_id = $1 ORDER BY ce.id",
            CUSTOMER_ENTITLEMENT_SELECT
        );
        let entitlements = sqlx::query_as::<sqlx::Postgres, CustomerEntitlementRow>(&sql)
            .bind(cus_product_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!(
                    "Database error loading entitlements of {}: {}",
                    cus_product_id, e
                );
                AppError::Database(format!("Failed to load customer entitlements: {}", e))
            })?;

        let prices = sqlx::query_as::<sqlx::Postgres, CustomerPriceRow>(
            r#"
            SELECT
                cpr.id AS customer_price_id, cpr.customer_product_id,
                p.id, p.internal_product_id, p.org_id, p.config,
                p.entitlement_id, p.is_custom, p.created_at
            FROM customer_prices cpr
            JOIN prices p ON p.id = cpr.price_id
            WHERE cpr.customer_product_id = $1
            ORDER BY p.created_at
            "#,
        )
        .bind(cus_product_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading prices of {}: {}", cus_product_id, e);
            AppError::Database(format!("Failed to load customer prices: {}", e))
        })?;

        Ok(CusProductLedger {
            customer_entitlements: entitlements
                .into_iter()
                .map(CustomerEntitlement::try_from)
                .collect::<AppResult<Vec<_>>>()?,
            customer_prices: prices
                .into_iter()
                .map(|row| CustomerPrice {
                    id: row.customer_price_id,
                    customer_product_id: row.customer_product_id,
                    price: row.price.into(),
                })
                .collect(),
        })
    }

    #[instrument(skip(self))]
    async fn list_by_customer_and_product(
        &self,
        internal_customer_id: &str,
        internal_product_id: &str,
    ) -> AppResult<Vec<FullCusProduct>> {
        let sql = format!(
            r#"
            {}
            WHERE cp.internal_customer_id = $1 AND cp.internal_product_id = $2
            ORDER BY cp.created_at
            "#,
            CUS_PRODUCT_SELECT
        );

        let rows = sqlx::query_as::<sqlx::Postgres, CusProductRow>(&sql)
            .bind(internal_customer_id)
            .bind(internal_product_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!(
                    "Database error listing products of customer {}: {}",
                    internal_customer_id, e
                );
                AppError::Database(format!("Failed to list customer products: {}", e))
            })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, to_product), fields(target_product = %to_product.internal_id, version = to_product.version))]
    async fn migrate_attachment(
        &self,
        cus_product_id: &str,
        to_product: &FullProduct,
    ) -> AppResult<FullCusProduct> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        let cus_product = Self::find_in_tx(&mut tx, cus_product_id)
            .await?
            .ok_or_else(|| AppError::CustomerProductNotFound(cus_product_id.to_string()))?;

        if cus_product.internal_product_id == to_product.internal_id {
            warn!("Customer product {} already on target version", cus_product_id);
            return Ok(cus_product);
        }

        sqlx::query(
            r#"
            UPDATE customer_products
            SET internal_product_id = $2, product_id = $3
            WHERE id = $1
            "#,
        )
        .bind(cus_product_id)
        .bind(&to_product.internal_id)
        .bind(&to_product.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Database error migrating customer product {}: {}", cus_product_id, e);
            AppError::Database(format!("Failed to migrate customer product: {}", e))
        })?;

        Self::migrate_entitlements(&mut tx, &cus_product, to_product).await?;

        sqlx::query("DELETE FROM customer_prices WHERE customer_product_id = $1")
            .bind(cus_product_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Database error clearing prices of {}: {}", cus_product_id, e);
                AppError::Database(format!("Failed to clear customer prices: {}", e))
            })?;

        for price in &to_product.prices {
            sqlx::query(
                r#"
                INSERT INTO customer_prices (id, customer_product_id, price_id)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(cus_product_id)
            .bind(&price.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Database error linking price {}: {}", price.id, e);
                AppError::Database(format!("Failed to link customer price: {}", e))
            })?;
        }

        let migrated = Self::find_in_tx(&mut tx, cus_product_id)
            .await?
            .ok_or_else(|| AppError::CustomerProductNotFound(cus_product_id.to_string()))?;

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        info!(
            "Migrated customer product {} to {} v{}",
            cus_product_id, to_product.id, to_product.version
        );

        Ok(migrated)
    }
}

//! Collaborator traits
//!
//! The reconciliation engine talks to storage and to the payment processor
//! only through these abstractions. Postgres implementations live in
//! `tessera-db`, the Stripe implementation in `tessera-stripe`.

use crate::error::AppError;
use crate::models::{
    AppEnv, CusProductLedger, CusProductStatus, Customer, CustomerEntitlement,
    CustomerEntitlementUpdate, Entity, Feature, FullCusProduct, FullProduct, InvoiceItem,
    InvoiceItemSpec, MeterEventSpec, Organization, Subscription,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Customer entitlement ledger
#[async_trait]
pub trait EntitlementRepository: Send + Sync {
    /// Find a customer's entitlement for a feature
    async fn find(
        &self,
        internal_customer_id: &str,
        internal_feature_id: &str,
    ) -> Result<Option<CustomerEntitlement>, AppError>;

    /// Find by primary key
    async fn find_by_id(&self, id: &str) -> Result<Option<CustomerEntitlement>, AppError>;

    /// Apply a partial update, returning the number of rows touched
    async fn update(&self, id: &str, update: &CustomerEntitlementUpdate)
        -> Result<u64, AppError>;

    /// Atomically add `delta` to a non-null balance
    async fn increment_balance(&self, id: &str, delta: Decimal) -> Result<u64, AppError>;

    /// Remove entity keys from the entitlement's per-entity map
    async fn delete_entities(&self, id: &str, entity_ids: &[String]) -> Result<u64, AppError>;
}

/// Customer product attachments
#[async_trait]
pub trait CustomerProductRepository: Send + Sync {
    /// Attachments billed by a processor subscription, restricted to `statuses`
    async fn list_by_subscription(
        &self,
        subscription_id: &str,
        org_id: &str,
        env: AppEnv,
        statuses: &[CusProductStatus],
    ) -> Result<Vec<FullCusProduct>, AppError>;

    /// Customer entitlements and customer prices of one attachment
    async fn get_entitlements_and_prices(
        &self,
        cus_product_id: &str,
    ) -> Result<CusProductLedger, AppError>;

    /// A customer's attachments to a given catalog product
    async fn list_by_customer_and_product(
        &self,
        internal_customer_id: &str,
        internal_product_id: &str,
    ) -> Result<Vec<FullCusProduct>, AppError>;

    /// Move an attachment onto another product version, carrying balances
    async fn migrate_attachment(
        &self,
        cus_product_id: &str,
        to_product: &FullProduct,
    ) -> Result<FullCusProduct, AppError>;
}

/// Customer entities (seats, projects, ...)
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Soft-deleted entities of a customer for a feature
    async fn list_deleted(
        &self,
        internal_customer_id: &str,
        internal_feature_id: &str,
    ) -> Result<Vec<Entity>, AppError>;

    async fn find_by_internal_id(
        &self,
        internal_id: &str,
        org_id: &str,
        env: AppEnv,
    ) -> Result<Option<Entity>, AppError>;

    /// Physically delete entities, returning the number removed
    async fn purge(&self, internal_ids: &[String]) -> Result<u64, AppError>;
}

/// Feature catalog
#[async_trait]
pub trait FeatureRepository: Send + Sync {
    async fn list(&self, org_id: &str, env: AppEnv) -> Result<Vec<Feature>, AppError>;
}

/// Organizations
#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Organization>, AppError>;
}

/// Catalog products
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// A product version with its catalog prices and entitlements
    async fn find_full(
        &self,
        internal_id: &str,
        org_id: &str,
        env: AppEnv,
    ) -> Result<Option<FullProduct>, AppError>;
}

/// Customers
#[async_trait]
pub trait CustomerRepository: Send + Sync {
    /// Customers of `org_id` in `env` among `internal_ids`; unknown ids are left out
    async fn list_by_internal_ids(
        &self,
        org_id: &str,
        env: AppEnv,
        internal_ids: &[String],
    ) -> Result<Vec<Customer>, AppError>;
}

/// Payment processor operations used by usage reconciliation
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Add a line item to an open invoice
    async fn create_invoice_item(&self, spec: &InvoiceItemSpec) -> Result<InvoiceItem, AppError>;

    /// Report aggregate usage to a meter
    async fn submit_meter_event(&self, spec: &MeterEventSpec) -> Result<(), AppError>;

    /// Set an invoice's description
    ///
    /// Fails with `AppError::InvoiceFinalized` once the invoice is finalized.
    async fn update_invoice_description(
        &self,
        invoice_id: &str,
        description: &str,
    ) -> Result<(), AppError>;

    async fn get_subscriptions(&self, ids: &[String]) -> Result<Vec<Subscription>, AppError>;
}

/// Builds a processor client bound to an organization's account
pub trait ProcessorProvider: Send + Sync {
    fn processor(
        &self,
        org: &Organization,
        env: AppEnv,
    ) -> Result<Arc<dyn PaymentProcessor>, AppError>;
}

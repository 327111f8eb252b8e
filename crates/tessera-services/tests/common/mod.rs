//! In-memory collaborators and fixtures for service tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tessera_core::{
    config::ReconciliationConfig,
    models::{
        AppEnv, BillWhen, BillingReason, CusProductLedger, CusProductStatus, Customer,
        CustomerEntitlement, CustomerEntitlementUpdate, CustomerPrice, EntInterval, Entitlement,
        Entity, EntityBalances, Feature, FeatureDisplay, FullCusProduct, FullProduct, Invoice,
        InvoiceItem, InvoiceItemSpec, MeterEventSpec, Organization, Price, PriceConfig,
        ProcessorKeys, Subscription, SubscriptionStatus, UsagePriceConfig, UsageTier,
        USAGE_FEATURES_METADATA_KEY,
    },
    traits::{
        CustomerProductRepository, EntitlementRepository, EntityRepository, FeatureRepository,
        PaymentProcessor, ProcessorProvider,
    },
    AppError,
};
use tessera_services::{InvoiceCreatedHandler, ReconcileContext, ReconcileStores};

pub const ORG_ID: &str = "org_1";
pub const SUB_ID: &str = "sub_1";
/// 2023-11-14T22:13:20Z
pub const INVOICE_CREATED: i64 = 1_700_000_000;
pub const PERIOD: i64 = 2_592_000;

// ==================== Ledger ====================

/// Every store the engine reads and writes, held in memory
#[derive(Default)]
pub struct InMemoryLedger {
    pub entitlements: Mutex<HashMap<String, CustomerEntitlement>>,
    pub cus_products: Mutex<Vec<FullCusProduct>>,
    pub customer_prices: Mutex<Vec<CustomerPrice>>,
    pub entities: Mutex<Vec<Entity>>,
    pub features: Mutex<Vec<Feature>>,
    /// Entitlement ids whose updates fail
    pub failing_updates: Mutex<HashSet<String>>,
    /// Customer product ids whose ledger lookup fails
    pub failing_ledgers: Mutex<HashSet<String>>,
    /// Customer product ids whose migration fails
    pub failing_migrations: Mutex<HashSet<String>>,
}

impl InMemoryLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_entitlement(&self, cus_ent: CustomerEntitlement) {
        self.entitlements.lock().insert(cus_ent.id.clone(), cus_ent);
    }

    pub fn add_cus_product(&self, cus_product: FullCusProduct) {
        self.cus_products.lock().push(cus_product);
    }

    pub fn add_price(&self, cus_product_id: &str, price: Price) {
        let mut prices = self.customer_prices.lock();
        let id = format!("cus_price_{}", prices.len() + 1);
        prices.push(CustomerPrice {
            id,
            customer_product_id: cus_product_id.to_string(),
            price,
        });
    }

    pub fn add_entity(&self, entity: Entity) {
        self.entities.lock().push(entity);
    }

    pub fn add_feature(&self, feature: Feature) {
        self.features.lock().push(feature);
    }

    pub fn entitlement(&self, id: &str) -> CustomerEntitlement {
        self.entitlements.lock().get(id).cloned().expect("entitlement exists")
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.entities.lock().iter().map(|e| e.internal_id.clone()).collect()
    }

    pub fn stores(self: &Arc<Self>) -> ReconcileStores {
        ReconcileStores {
            entitlements: self.clone(),
            cus_products: self.clone(),
            entities: self.clone(),
            features: self.clone(),
        }
    }
}

#[async_trait]
impl EntitlementRepository for InMemoryLedger {
    async fn find(
        &self,
        internal_customer_id: &str,
        internal_feature_id: &str,
    ) -> Result<Option<CustomerEntitlement>, AppError> {
        Ok(self
            .entitlements
            .lock()
            .values()
            .find(|ce| {
                ce.internal_customer_id == internal_customer_id
                    && ce.internal_feature_id == internal_feature_id
            })
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CustomerEntitlement>, AppError> {
        Ok(self.entitlements.lock().get(id).cloned())
    }

    async fn update(&self, id: &str, update: &CustomerEntitlementUpdate) -> Result<u64, AppError> {
        if self.failing_updates.lock().contains(id) {
            return Err(AppError::Database("connection reset".to_string()));
        }

        let mut entitlements = self.entitlements.lock();
        match entitlements.get_mut(id) {
            Some(cus_ent) if !update.is_empty() => {
                update.apply_to(cus_ent);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn increment_balance(&self, id: &str, delta: Decimal) -> Result<u64, AppError> {
        let mut entitlements = self.entitlements.lock();
        match entitlements.get_mut(id).and_then(|ce| ce.balance.as_mut()) {
            Some(balance) => {
                *balance += delta;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_entities(&self, id: &str, entity_ids: &[String]) -> Result<u64, AppError> {
        let mut entitlements = self.entitlements.lock();
        match entitlements.get_mut(id).and_then(|ce| ce.entities.as_mut()) {
            Some(entities) => {
                entities.remove_entities(entity_ids.iter().map(String::as_str));
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl CustomerProductRepository for InMemoryLedger {
    async fn list_by_subscription(
        &self,
        subscription_id: &str,
        org_id: &str,
        env: AppEnv,
        statuses: &[CusProductStatus],
    ) -> Result<Vec<FullCusProduct>, AppError> {
        Ok(self
            .cus_products
            .lock()
            .iter()
            .filter(|cp| {
                cp.subscription_ids.iter().any(|s| s == subscription_id)
                    && cp.customer.org_id == org_id
                    && cp.customer.env == env
                    && statuses.contains(&cp.status)
            })
            .cloned()
            .collect())
    }

    async fn get_entitlements_and_prices(
        &self,
        cus_product_id: &str,
    ) -> Result<CusProductLedger, AppError> {
        if self.failing_ledgers.lock().contains(cus_product_id) {
            return Err(AppError::Database("statement timeout".to_string()));
        }

        let mut customer_entitlements: Vec<CustomerEntitlement> = self
            .entitlements
            .lock()
            .values()
            .filter(|ce| ce.customer_product_id.as_deref() == Some(cus_product_id))
            .cloned()
            .collect();
        customer_entitlements.sort_by(|a, b| a.id.cmp(&b.id));

        let customer_prices = self
            .customer_prices
            .lock()
            .iter()
            .filter(|cp| cp.customer_product_id == cus_product_id)
            .cloned()
            .collect();

        Ok(CusProductLedger {
            customer_entitlements,
            customer_prices,
        })
    }

    async fn list_by_customer_and_product(
        &self,
        internal_customer_id: &str,
        internal_product_id: &str,
    ) -> Result<Vec<FullCusProduct>, AppError> {
        Ok(self
            .cus_products
            .lock()
            .iter()
            .filter(|cp| {
                cp.internal_customer_id == internal_customer_id
                    && cp.internal_product_id == internal_product_id
            })
            .cloned()
            .collect())
    }

    async fn migrate_attachment(
        &self,
        cus_product_id: &str,
        to_product: &FullProduct,
    ) -> Result<FullCusProduct, AppError> {
        if self.failing_migrations.lock().contains(cus_product_id) {
            return Err(AppError::Transaction("deadlock detected".to_string()));
        }

        let mut cus_products = self.cus_products.lock();
        let cus_product = cus_products
            .iter_mut()
            .find(|cp| cp.id == cus_product_id)
            .ok_or_else(|| AppError::CustomerProductNotFound(cus_product_id.to_string()))?;

        cus_product.internal_product_id = to_product.internal_id.clone();
        cus_product.product_id = to_product.id.clone();
        Ok(cus_product.clone())
    }
}

#[async_trait]
impl EntityRepository for InMemoryLedger {
    async fn list_deleted(
        &self,
        internal_customer_id: &str,
        internal_feature_id: &str,
    ) -> Result<Vec<Entity>, AppError> {
        Ok(self
            .entities
            .lock()
            .iter()
            .filter(|e| {
                e.deleted
                    && e.internal_customer_id == internal_customer_id
                    && e.internal_feature_id == internal_feature_id
            })
            .cloned()
            .collect())
    }

    async fn find_by_internal_id(
        &self,
        internal_id: &str,
        _org_id: &str,
        _env: AppEnv,
    ) -> Result<Option<Entity>, AppError> {
        Ok(self
            .entities
            .lock()
            .iter()
            .find(|e| e.internal_id == internal_id)
            .cloned())
    }

    async fn purge(&self, internal_ids: &[String]) -> Result<u64, AppError> {
        let mut entities = self.entities.lock();
        let before = entities.len();
        entities.retain(|e| !internal_ids.contains(&e.internal_id));
        Ok((before - entities.len()) as u64)
    }
}

#[async_trait]
impl FeatureRepository for InMemoryLedger {
    async fn list(&self, org_id: &str, _env: AppEnv) -> Result<Vec<Feature>, AppError> {
        Ok(self
            .features
            .lock()
            .iter()
            .filter(|f| f.org_id == org_id)
            .cloned()
            .collect())
    }
}

// ==================== Processor ====================

/// Processor double that records every call
#[derive(Default)]
pub struct RecordingProcessor {
    pub invoice_items: Mutex<Vec<InvoiceItemSpec>>,
    pub meter_events: Mutex<Vec<MeterEventSpec>>,
    pub descriptions: Mutex<Vec<(String, String)>>,
    pub subscriptions: Mutex<HashMap<String, Subscription>>,
    /// Invoice ids that reject description updates as finalized
    pub finalized_invoices: Mutex<HashSet<String>>,
    /// Meter ids that reject events
    pub failing_meters: Mutex<HashSet<String>>,
}

impl RecordingProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_subscription(&self, subscription: Subscription) {
        self.subscriptions
            .lock()
            .insert(subscription.id.clone(), subscription);
    }

    pub fn meter_values(&self) -> Vec<Decimal> {
        self.meter_events.lock().iter().map(|e| e.value).collect()
    }

    /// Total processor writes, excluding reads
    pub fn write_count(&self) -> usize {
        self.invoice_items.lock().len()
            + self.meter_events.lock().len()
            + self.descriptions.lock().len()
    }
}

#[async_trait]
impl PaymentProcessor for RecordingProcessor {
    async fn create_invoice_item(&self, spec: &InvoiceItemSpec) -> Result<InvoiceItem, AppError> {
        let mut items = self.invoice_items.lock();
        items.push(spec.clone());
        Ok(InvoiceItem {
            id: format!("ii_{}", items.len()),
            invoice: Some(spec.invoice.clone()),
            amount: spec.amount_minor,
            currency: spec.currency.clone(),
        })
    }

    async fn submit_meter_event(&self, spec: &MeterEventSpec) -> Result<(), AppError> {
        if self.failing_meters.lock().contains(&spec.meter_id) {
            return Err(AppError::Processor(format!(
                "No such meter: {}",
                spec.meter_id
            )));
        }
        self.meter_events.lock().push(spec.clone());
        Ok(())
    }

    async fn update_invoice_description(
        &self,
        invoice_id: &str,
        description: &str,
    ) -> Result<(), AppError> {
        if self.finalized_invoices.lock().contains(invoice_id) {
            return Err(AppError::InvoiceFinalized(invoice_id.to_string()));
        }
        self.descriptions
            .lock()
            .push((invoice_id.to_string(), description.to_string()));
        Ok(())
    }

    async fn get_subscriptions(&self, ids: &[String]) -> Result<Vec<Subscription>, AppError> {
        let subscriptions = self.subscriptions.lock();
        Ok(ids
            .iter()
            .filter_map(|id| subscriptions.get(id).cloned())
            .collect())
    }
}

/// Hands out the same recording processor for every organization
pub struct FixedProvider(pub Arc<RecordingProcessor>);

impl ProcessorProvider for FixedProvider {
    fn processor(
        &self,
        _org: &Organization,
        _env: AppEnv,
    ) -> Result<Arc<dyn PaymentProcessor>, AppError> {
        Ok(self.0.clone())
    }
}

// ==================== Harness ====================

pub struct Harness {
    pub ledger: Arc<InMemoryLedger>,
    pub processor: Arc<RecordingProcessor>,
    pub handler: InvoiceCreatedHandler,
}

impl Harness {
    pub fn new() -> Self {
        let ledger = InMemoryLedger::new();
        let processor = RecordingProcessor::new();
        let handler = InvoiceCreatedHandler::new(
            ledger.stores(),
            Arc::new(FixedProvider(processor.clone())),
            &ReconciliationConfig::default(),
        );

        Self {
            ledger,
            processor,
            handler,
        }
    }

    pub fn context(&self) -> ReconcileContext {
        ReconcileContext::new(organization(), AppEnv::Sandbox, "evt_test")
    }
}

// ==================== Fixtures ====================

pub fn organization() -> Organization {
    Organization {
        id: ORG_ID.to_string(),
        slug: "acme".to_string(),
        name: "Acme".to_string(),
        processor_keys: ProcessorKeys {
            test_secret_key: Some("sk_test_123".to_string()),
            live_secret_key: None,
        },
    }
}

pub fn customer() -> Customer {
    Customer {
        internal_id: "cus_internal_1".to_string(),
        id: Some("customer_1".to_string()),
        name: Some("Jane Doe".to_string()),
        email: Some("jane@example.com".to_string()),
        processor_id: Some("cus_stripe_1".to_string()),
        org_id: ORG_ID.to_string(),
        env: AppEnv::Sandbox,
    }
}

pub fn feature(internal_id: &str, id: &str, singular: &str, plural: &str) -> Feature {
    Feature {
        internal_id: internal_id.to_string(),
        id: id.to_string(),
        name: plural.to_string(),
        org_id: ORG_ID.to_string(),
        display: Some(FeatureDisplay {
            singular: Some(singular.to_string()),
            plural: Some(plural.to_string()),
        }),
    }
}

pub fn api_calls() -> Feature {
    feature("fe_calls", "api_calls", "API call", "API calls")
}

pub fn seats() -> Feature {
    feature("fe_seats", "seats", "seat", "seats")
}

pub fn users() -> Feature {
    feature("fe_users", "users", "user", "users")
}

pub fn usage_config(feature: &Feature, billing_units: u32, should_prorate: bool) -> UsagePriceConfig {
    UsagePriceConfig {
        internal_feature_id: feature.internal_id.clone(),
        feature_id: feature.id.clone(),
        bill_when: BillWhen::EndOfPeriod,
        should_prorate,
        billing_units,
        usage_tiers: vec![UsageTier {
            to: None,
            amount: Decimal::new(50, 2),
        }],
        stripe_meter_id: Some(format!("mtr_{}", feature.id)),
        stripe_price_id: Some(format!("price_{}", feature.id)),
        interval: Some("month".to_string()),
    }
}

pub fn price(id: &str, config: PriceConfig) -> Price {
    Price {
        id: id.to_string(),
        internal_product_id: "prod_internal_pro".to_string(),
        org_id: ORG_ID.to_string(),
        config,
        entitlement_id: None,
        is_custom: false,
        created_at: 0,
    }
}

pub fn cus_product(id: &str, created_at_ms: i64) -> FullCusProduct {
    FullCusProduct {
        id: id.to_string(),
        internal_customer_id: "cus_internal_1".to_string(),
        customer: customer(),
        internal_product_id: "prod_internal_pro".to_string(),
        product_id: "pro".to_string(),
        created_at: created_at_ms,
        status: CusProductStatus::Active,
        subscription_ids: vec![SUB_ID.to_string()],
        internal_entity_id: None,
    }
}

/// Attachment created a full period before the invoice
pub fn settled_cus_product(id: &str) -> FullCusProduct {
    cus_product(id, (INVOICE_CREATED - PERIOD) * 1_000)
}

pub fn cus_ent(
    id: &str,
    cus_product_id: &str,
    feature: &Feature,
    allowance: Decimal,
    balance: Option<Decimal>,
    next_reset_at: Option<i64>,
) -> CustomerEntitlement {
    CustomerEntitlement {
        id: id.to_string(),
        internal_customer_id: "cus_internal_1".to_string(),
        customer_product_id: Some(cus_product_id.to_string()),
        internal_feature_id: feature.internal_id.clone(),
        feature_id: feature.id.clone(),
        entitlement: Entitlement {
            id: format!("ent_{}", feature.id),
            internal_feature_id: feature.internal_id.clone(),
            feature: feature.clone(),
            allowance: Some(allowance),
            interval: EntInterval::Month,
            entity_feature_id: None,
        },
        balance,
        adjustment: Decimal::ZERO,
        next_reset_at,
        entities: None,
    }
}

/// Entitlement tracking one balance per entity of `linked`
pub fn entity_scoped(mut cus_ent: CustomerEntitlement, linked: &Feature, entities: EntityBalances) -> CustomerEntitlement {
    cus_ent.entitlement.entity_feature_id = Some(linked.id.clone());
    cus_ent.entities = Some(entities);
    cus_ent
}

pub fn entity(internal_id: &str, id: &str, name: &str, feature: &Feature, deleted: bool) -> Entity {
    Entity {
        internal_id: internal_id.to_string(),
        id: Some(id.to_string()),
        name: Some(name.to_string()),
        internal_customer_id: "cus_internal_1".to_string(),
        internal_feature_id: feature.internal_id.clone(),
        feature_id: feature.id.clone(),
        deleted,
        created_at: Utc::now(),
    }
}

pub fn invoice(billing_reason: BillingReason) -> Invoice {
    Invoice {
        id: "in_1".to_string(),
        customer: Some("cus_stripe_1".to_string()),
        currency: "usd".to_string(),
        period_start: INVOICE_CREATED - PERIOD,
        period_end: INVOICE_CREATED,
        created: INVOICE_CREATED,
        billing_reason: Some(billing_reason),
        subscription: Some(SUB_ID.to_string()),
        status: Some("draft".to_string()),
    }
}

/// Subscription whose new period starts when the invoice was created
pub fn subscription(id: &str, usage_features: &[&str]) -> Subscription {
    let mut metadata = HashMap::new();
    if !usage_features.is_empty() {
        let features = serde_json::to_string(usage_features).expect("serializable");
        metadata.insert(USAGE_FEATURES_METADATA_KEY.to_string(), features);
    }

    Subscription {
        id: id.to_string(),
        current_period_start: INVOICE_CREATED,
        current_period_end: INVOICE_CREATED + PERIOD,
        trial_end: None,
        status: SubscriptionStatus::Active,
        metadata,
    }
}

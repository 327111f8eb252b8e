//! Domain models for Tessera
//!
//! This module contains all the core domain models used throughout the application.

pub mod customer;
pub mod entitlement;
pub mod entity;
pub mod feature;
pub mod invoice;
pub mod price;
pub mod product;

pub use customer::{AppEnv, Customer, Organization, ProcessorKeys};
pub use entitlement::{
    CustomerEntitlement, CustomerEntitlementUpdate, EntInterval, Entitlement, EntityBalance,
    EntityBalances,
};
pub use entity::Entity;
pub use feature::{Feature, FeatureDisplay};
pub use invoice::{
    BillingReason, Invoice, InvoiceItem, InvoiceItemSpec, MeterEventSpec, Subscription,
    SubscriptionStatus, USAGE_FEATURES_METADATA_KEY,
};
pub use price::{BillWhen, FixedPriceConfig, Price, PriceConfig, UsagePriceConfig, UsageTier};
pub use product::{CusProductLedger, CusProductStatus, CustomerPrice, FullCusProduct, FullProduct};

//! Usage reconciliation services for Tessera
//!
//! When the processor opens a new invoice (`invoice.created`) these services
//! settle the closing billing period: report metered usage, reset
//! entitlement balances for the next period, and credit back entities that
//! were removed mid-period.
//!
//! # Architecture
//!
//! Services depend only on the collaborator traits from `tessera-core`:
//! - Stores are shared as `Arc<dyn Trait>` so the binary wires Postgres
//!   and Stripe while tests wire in-memory fakes
//! - Every run carries a `ReconcileContext` (org, env, correlation id, span)
//! - Guards return typed skip reasons; only hard failures are errors
//!
//! # Services
//!
//! - `classify` - price config to billing type
//! - `PeriodReconciler` - new-period and duplicate-invoice guards
//! - `UsageReporter` - usage-in-arrear reporting
//! - `ResetEngine` - entitlement balance resets
//! - `ProratedDeletionHandler` - entity deletion credit-backs
//! - `InvoiceCreatedHandler` - `invoice.created` orchestration
//! - `MigrationService` - moving customers between product versions

pub mod classifier;
pub mod context;
pub mod invoice_created;
pub mod migration;
pub mod period;
pub mod prorated;
pub mod reset;
pub mod usage_reporter;

pub use classifier::{classify, BillingType};
pub use context::ReconcileContext;
pub use invoice_created::{
    resolve_usage_subscription, InvoiceCreatedHandler, ReconcileOutcome, ReconcileStores,
    SkippedLine,
};
pub use migration::{MigrationJob, MigrationService, MigrationSummary};
pub use period::{PeriodDecision, PeriodReconciler, SkipReason};
pub use prorated::{DeletionSettlement, ProratedDeletionHandler, ProratedOutcome};
pub use reset::{plan_reset, ResetEngine, ResetPlan};
pub use usage_reporter::{UsageOutcome, UsageQuantities, UsageReport, UsageReporter};

/// Business logic constants
pub mod constants {
    /// Attachments created this close to the invoice are treated as duplicates
    pub const DEFAULT_RECENT_CREATION_WINDOW_MINUTES: i64 = 10;

    /// Usage is attributed to one day before the invoice was created
    pub const DEFAULT_USAGE_BACKDATE_SECS: i64 = 86_400;

    /// Processor timestamps are seconds, ledger timestamps milliseconds
    pub const MILLIS_PER_SECOND: i64 = 1_000;

    /// Customers migrated concurrently in one batch
    pub const MIGRATION_CONCURRENCY: usize = 8;

    /// Currencies whose amounts carry no minor unit
    pub const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
        "bif", "clp", "djf", "gnf", "jpy", "kmf", "krw", "mga", "pyg", "rwf", "ugx", "vnd",
        "vuv", "xaf", "xof", "xpf",
    ];
}

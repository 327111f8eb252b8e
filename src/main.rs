//! Tessera billing server
//!
//! Receives payment processor webhooks and reconciles usage-based billing
//! when a subscription rolls into a new period. Also migrates customers
//! between product versions on request.

use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tessera_api::{configure_migrations, configure_webhooks, MigrationState, WebhookState};
use tessera_core::AppConfig;
use tessera_db::{
    create_pool, PgCustomerProductRepository, PgCustomerRepository, PgEntitlementRepository,
    PgEntityRepository, PgFeatureRepository, PgOrganizationRepository, PgProductRepository,
};
use tessera_services::{InvoiceCreatedHandler, MigrationService, ReconcileStores};
use tessera_stripe::StripeProcessorProvider;
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Health check endpoint
async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "tessera-billing",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Configure routes
fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .configure(configure_webhooks)
        .configure(configure_migrations);
}

/// Initialize tracing/logging
fn init_tracing(json_logs: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "tessera_billing=info,tessera_api=info,tessera_services=info,tessera_db=info,\
             tessera_stripe=info,actix_web=info,sqlx=warn",
        )
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    if json_logs {
        registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(true))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;

    init_tracing(config.server.json_logs);

    info!("Starting Tessera billing v{}", env!("CARGO_PKG_VERSION"));

    info!("Connecting to database...");
    let pool = create_pool(&config.database.url, Some(config.database.max_connections))
        .await
        .context("Failed to create database pool")?;

    info!(
        "Database connection established with {} max connections",
        config.database.max_connections
    );

    let cus_products = Arc::new(PgCustomerProductRepository::new(pool.clone()));
    let organizations = Arc::new(PgOrganizationRepository::new(pool.clone()));

    let stores = ReconcileStores {
        entitlements: Arc::new(PgEntitlementRepository::new(pool.clone())),
        cus_products: cus_products.clone(),
        entities: Arc::new(PgEntityRepository::new(pool.clone())),
        features: Arc::new(PgFeatureRepository::new(pool.clone())),
    };
    let provider = Arc::new(StripeProcessorProvider::new(config.stripe.clone()));

    let webhooks = web::Data::new(WebhookState {
        organizations: organizations.clone(),
        invoice_created: Arc::new(InvoiceCreatedHandler::new(
            stores,
            provider,
            &config.reconciliation,
        )),
    });

    let migrations = web::Data::new(MigrationState {
        organizations,
        products: Arc::new(PgProductRepository::new(pool.clone())),
        customers: Arc::new(PgCustomerRepository::new(pool.clone())),
        migrations: Arc::new(MigrationService::new(cus_products)),
    });

    let bind_addr = config.server_addr();
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, config.server.workers
    );

    HttpServer::new(move || {
        App::new()
            .app_data(webhooks.clone())
            .app_data(migrations.clone())
            // Stripe events stay well under 1MB
            .app_data(web::PayloadConfig::new(1024 * 1024))
            .wrap(TracingLogger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(configure_routes)
    })
    .workers(config.server.workers)
    .bind(&bind_addr)?
    .run()
    .await?;

    Ok(())
}

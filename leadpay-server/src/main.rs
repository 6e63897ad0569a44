//! Leadpay Server
//!
//! Prices marketplace leads and sells them to pros: prepaid balance first,
//! card gateway for the rest, with a money-back guarantee when the customer
//! never responds.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::{ConfigLoader, get_database_url};
use leadpay_core::events::lead_event_channel;
use leadpay_core::gateway::HttpGateway;
use leadpay_core::processors::{LeadEventNotifier, StuckPurchaseReaper};
use leadpay_core::store::{MemoryStore, PgStore, SharedStore};
use server::{build_router, run_server};
use shutdown::spawn_config_reload_handler;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Leadpay - lead pricing, purchase and money-back guarantee service
#[derive(Parser, Debug)]
#[command(name = "leadpay-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./leadpay-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Keep all state in memory instead of Postgres (demo runs only)
    #[arg(long, default_value = "false", conflicts_with = "migrate")]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let args = Args::parse();

    tracing::info!("Starting leadpay-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;

    let listen_addr = loaded_config.server.listen;
    let customer_prefix = loaded_config.gateway.customer_prefix.clone();
    let gateway = HttpGateway::new(&loaded_config.gateway)?;
    tracing::info!(
        bands = loaded_config.bands.len(),
        "Configuration loaded from {:?}",
        args.config
    );

    // Convert to shared config with separate locks for each section
    let shared_config = loaded_config.into_shared();

    let (store, db_pool) = if args.in_memory {
        tracing::warn!("Running with the in-memory store; all state is lost on exit");
        (Arc::new(MemoryStore::new()) as SharedStore, None)
    } else {
        let db_pool = connect_database(args.migrate).await?;
        (
            Arc::new(PgStore::new(db_pool.clone())) as SharedStore,
            Some(db_pool),
        )
    };

    let (events_tx, events_rx) = lead_event_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create application state
    let state = AppState::new(
        shared_config.clone(),
        store,
        Arc::new(gateway),
        customer_prefix,
        events_tx,
    )
    .await;

    // Spawn background processors
    let mut processors = tokio::task::JoinSet::new();
    processors.spawn(state.scheduler.clone().run(shutdown_rx.clone()));
    processors.spawn(
        StuckPurchaseReaper::new(
            state.orchestrator.clone(),
            shared_config.refund.clone(),
            shutdown_rx.clone(),
        )
        .run(),
    );
    processors.spawn(
        LeadEventNotifier::new(shared_config.notifier.clone(), events_rx, shutdown_rx).run(),
    );

    // Spawn config reload handler (listens for SIGHUP)
    let shutdown_notify = spawn_config_reload_handler(shared_config, config_loader);

    // Build the router
    let router = build_router(state);

    // Run the server
    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr, shutdown_tx.clone()).await;

    // Stop the processors even if the server failed to start
    let _ = shutdown_tx.send(true);
    shutdown_notify.notify_one();
    while let Some(joined) = processors.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Background processor panicked");
        }
    }

    // Close database connections gracefully
    if let Some(db_pool) = db_pool {
        tracing::info!("Closing database connections...");
        db_pool.close().await;
    }
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Connect to `DATABASE_URL`, running migrations first if requested.
async fn connect_database(migrate: bool) -> anyhow::Result<PgPool> {
    // Get database URL from environment
    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    // Run migrations if requested
    if migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    Ok(db_pool)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

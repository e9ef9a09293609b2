use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use achsync_core::cli::{Cli, Commands, DbCommands};
use achsync_core::config::Config;
use achsync_core::orders::{OrderSynchronizer, PgOrderStore};
use achsync_core::provider::ProviderClient;
use achsync_core::services::reconciliation::{
    Reconciler, ReconcilerSettings, run_scheduler,
};
use achsync_core::store::{PgRunStatsStore, PgTransactionStore, RunStatsStore};
use achsync_core::{AppState, cli, create_app, db};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Reconcile => {
            let pool = db::create_pool(&config).await?;
            let (reconciler, _stats) = build_reconciler(&config, pool);
            cli::handle_reconcile_once(&reconciler).await
        }
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config),
    }
}

/// Wires the reconciler dependencies once; every trigger path shares the
/// same instance.
fn build_reconciler(config: &Config, pool: PgPool) -> (Arc<Reconciler>, Arc<PgRunStatsStore>) {
    let transactions = Arc::new(PgTransactionStore::new(pool.clone()));
    let orders = Arc::new(PgOrderStore::new(pool.clone()));
    let stats = Arc::new(PgRunStatsStore::new(pool));
    let provider = Arc::new(ProviderClient::new(
        config.provider_base_url.clone(),
        Duration::from_secs(config.provider_timeout_secs),
    ));

    let reconciler = Arc::new(Reconciler::new(
        transactions,
        OrderSynchronizer::new(orders),
        provider,
        stats.clone(),
        config.merchant_credentials(),
        ReconcilerSettings {
            batch_size: config.reconcile_batch_size,
            pacing: Duration::from_millis(config.reconcile_pacing_ms),
        },
    ));

    (reconciler, stats)
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;

    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    let (reconciler, stats) = build_reconciler(&config, pool.clone());
    tracing::info!(
        "Provider client initialized with URL: {}",
        config.provider_base_url
    );

    // The scheduler is (re)armed unconditionally on every boot and torn
    // down through the watch channel.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(run_scheduler(
        reconciler.clone(),
        Duration::from_secs(config.reconcile_interval_secs),
        shutdown_rx,
    ));

    let state = AppState {
        db: pool,
        reconciler,
        stats: stats as Arc<dyn RunStatsStore>,
    };
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = scheduler.await;

    Ok(())
}

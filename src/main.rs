use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use lockkeeper::config::{self, Config};
use lockkeeper::coordination::{self, LockStore, RedisLockStore};
use lockkeeper::inventory::{Inventory, RedisStockStore};
use lockkeeper::metrics::MetricsRegistry;
use lockkeeper::{http, AppState};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "lockkeeper", about = "Inventory service guarded by a Redis distributed lock")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/lockkeeper/config.yaml")]
    config: String,
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: AppState) -> Result<()> {
    let app = http::handler::create_router(Arc::new(state.clone()));

    let listen_addr: std::net::SocketAddr = state
        .config
        .server
        .http_listen
        .parse()
        .context("invalid http_listen address")?;

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Config ----
    let config: Arc<Config> = Arc::new(config::load_config(&cli.config)?);

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(config_path = %cli.config, "starting lockkeeper");

    // ---- Infrastructure clients ----
    let redis = coordination::redis::create_pool(&config.redis).await?;
    let locks: Arc<dyn LockStore> = Arc::new(RedisLockStore::new(redis.clone()));

    // ---- Metrics ----
    let metrics = MetricsRegistry::new();

    // ---- Inventory ----
    let inventory = Inventory::new(
        Arc::new(RedisStockStore::new(redis.clone())),
        locks,
        config.inventory.clone(),
        config.lock.clone(),
        Arc::clone(&metrics.metrics),
    );
    if config.inventory.seed_on_start {
        inventory.seed().await?;
    }

    // ---- App state ----
    let state = AppState {
        config: Arc::clone(&config),
        redis,
        metrics,
        inventory: Arc::new(inventory),
    };

    run_http_server(state).await?;

    tracing::info!("lockkeeper shut down cleanly");
    Ok(())
}

//! Application entry point for the `oceanflow-dashboard` service.
//!
//! Startup sequence:
//! - Load `.env`, then layered configuration (env > `config.toml` > defaults)
//! - Initialize structured logging/tracing
//! - Open the reading store (DuckDB, PostgreSQL or SQLite, picked from `FILE_PATH`)
//! - Spawn the refresh loop that owns the cache
//! - Mount the read-only routes via the `routes` gateway (EMBP) and serve
//!
//! # Environment Variables
//! - `FILE_PATH` – DuckDB file, SQLite file or PostgreSQL URL
//!   (default: `oceanographic_data.duckdb`)
//! - `UPDATE_FREQUENCY` – seconds between refreshes (default: 10)
//! - `RESAMPLE` – `none`, `10s`, `1min`, ... (default: `1min`)
//! - `DB_TABLE`, `TIME_RANGE_HOURS`, `QUERY_TIMEOUT_SECS`, `BACKEND`,
//!   `LISTEN_ADDR`, `DB_POOL_MAX`
//! - `DASHBOARD_CONFIG` – config file path (default: `config.toml`)
//! - `DASHBOARD_LOG_LEVEL`, `DASHBOARD_SPAN_EVENTS`, `FORCE_COLOR` – logging
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use dotenvy::dotenv;

use oceanflow::{config, dashboard, routes, store, telemetry, ConfigLayer, Source, SystemClock};

/// How often the refresh loop re-evaluates the scheduler.
const POLL_EVERY: Duration = Duration::from_secs(1);

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    telemetry::init_tracing();

    let cfg = config::load(ConfigLayer::default())?;
    cfg.log_config();

    let store = store::open_store(&cfg.store_settings())
        .with_context(|| format!("Failed to open store '{}'", config::mask_password(&cfg.file_path)))?;
    let source = Source::new(store, cfg.query_timeout());
    tracing::info!(
        "Store backend: {} ({:?} bucketing)",
        source.capabilities().backend,
        source.bucketing()
    );

    let (handle, refresh_task) = dashboard::spawn(
        source,
        SystemClock,
        cfg.initial_view()?,
        cfg.update_interval(),
        POLL_EVERY,
    );

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(handle);

    tracing::info!("Listening on {}", cfg.listen_addr);
    let listener = tokio::net::TcpListener::bind(cfg.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last command sender; the loop exits on its own.
    refresh_task.await.ok();
    Ok(())
}

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

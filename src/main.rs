//! scrim-gateway server entry point.
//!
//! Connects the store, starts the background queue and serves the
//! operator REST API until Ctrl-C, then drains queued work.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use scrim_gateway::api;
use scrim_gateway::app_state::{AppState, Stores};
use scrim_gateway::config::GatewayConfig;
use scrim_gateway::persistence::{MemoryStore, PostgresStore};
use scrim_gateway::service::TaskQueue;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "could not listen for shutdown signal");
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = GatewayConfig::from_env()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    init_tracing(config.log_json);
    tracing::info!(addr = %config.listen_addr, "starting scrim-gateway");

    // Build persistence layer
    let stores = if config.persistence_enabled {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .min_connections(config.database.min_connections)
            .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
            .connect(&config.database.url)
            .await
            .context("connecting to PostgreSQL")?;
        let store = Arc::new(PostgresStore::new(pool));
        store.migrate().await.context("running migrations")?;
        tracing::info!("persistence enabled");
        Stores::postgres(&store)
    } else {
        tracing::warn!("persistence disabled, matches live in memory only");
        Stores::memory(&Arc::new(MemoryStore::new()))
    };

    // Build service layer
    let tasks = Arc::new(TaskQueue::start(&config.tasks));
    let app_state = AppState::build(&config, stores, Arc::clone(&tasks))
        .context("building application state")?;

    // Build router
    let app = api::build_router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tasks.shutdown().await;
    Ok(())
}

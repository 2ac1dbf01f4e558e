//! Slot delegator server

use clap::Parser;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slot_delegator::clock::SystemClock;
use slot_delegator::config::ServerConfig;
use slot_delegator::delegation::DelegationEngine;
use slot_delegator::store::spawn_recorder;
use slot_delegator::vault::PrizeVault;
use slot_delegator::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slot_delegator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::parse();

    // Database connection
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    let vault = PrizeVault::new(config.vault_address(), config.vault_decimals);
    let engine = Arc::new(DelegationEngine::new(
        vault,
        config.engine_config(),
        Arc::new(SystemClock),
    ));
    tracing::info!(engine = %engine.address(), vault = %config.vault_address(), "Engine ready");

    let state = AppState::new(pool, engine.clone());
    state.store.migrate().await?;

    let recorded = state.store.count_events().await?;
    if recorded > 0 {
        tracing::warn!(
            recorded,
            "Event log holds events from an earlier run; engine state starts empty"
        );
    }
    let _recorder = spawn_recorder(state.store.clone(), engine.journal().await);

    let app = slot_delegator::router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

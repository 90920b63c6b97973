//! LoopHive server binary.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use loophive_api::config::ServerConfig;
use loophive_api::pricing::PricingEngine;
use loophive_api::state::AppState;
use loophive_api::ws::WsManager;
use loophive_api::{bootstrap_dev_tenant, build_router, jobs};
use loophive_storage::{JsonStorage, StorageBackend};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();

    let storage: Arc<dyn StorageBackend> = Arc::new(JsonStorage::new(&config.data_dir));
    storage.initialize().await?;

    let pricing = Arc::new(PricingEngine::new(&config.data_dir));
    pricing.initialize().await;

    let ws = Arc::new(WsManager::new());
    let state = AppState::new(storage.clone(), pricing, ws.clone(), config.clone());

    if let Some(dev_key) = &config.dev_key {
        bootstrap_dev_tenant(&state, dev_key).await?;
    }

    // Background jobs with a shared shutdown signal.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retention = tokio::spawn(jobs::retention_task(
        storage.clone(),
        config.retention_interval,
        shutdown_rx.clone(),
    ));
    let ping = tokio::spawn(jobs::ws_ping_task(
        ws,
        config.ws_ping_interval,
        shutdown_rx,
    ));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "LoopHive server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = retention.await;
    let _ = ping.await;
    storage.close().await?;
    Ok(())
}

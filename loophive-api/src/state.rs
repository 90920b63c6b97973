//! Shared application state for Axum routers.

use std::sync::Arc;

use loophive_storage::StorageBackend;

use crate::config::ServerConfig;
use crate::middleware::RateLimiter;
use crate::pricing::PricingEngine;
use crate::ws::WsManager;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageBackend>,
    pub pricing: Arc<PricingEngine>,
    pub ws: Arc<WsManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        pricing: Arc<PricingEngine>,
        ws: Arc<WsManager>,
        config: ServerConfig,
    ) -> Self {
        Self {
            storage,
            pricing,
            ws,
            rate_limiter: Arc::new(RateLimiter::new()),
            config: Arc::new(config),
        }
    }
}

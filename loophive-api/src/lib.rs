//! LoopHive API - HTTP/WebSocket layer and ingestion pipeline.
//!
//! Assembles the Axum router (auth + rate-limit middleware, the `/v1`
//! resource routes, the stream endpoint), the background jobs, and the
//! development-tenant bootstrap.

pub mod alerting;
pub mod auth;
pub mod config;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod middleware;
pub mod pricing;
pub mod routes;
pub mod state;
pub mod types;
pub mod ws;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use loophive_core::{ApiKeyRecord, KeyType, TenantPlan};

use crate::auth::hash_key;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    let v1 = Router::new()
        // Write path
        .route("/ingest", post(ingest::ingest))
        // Agents
        .route("/agents", get(routes::agents::list_agents))
        .route("/agents/:agent_id", get(routes::agents::get_agent))
        .route(
            "/agents/:agent_id/pipeline",
            get(routes::agents::get_agent_pipeline),
        )
        .route("/pipeline", get(routes::agents::get_fleet_pipeline))
        // Tasks
        .route("/tasks", get(routes::tasks::list_tasks))
        .route(
            "/tasks/:task_id/timeline",
            get(routes::tasks::get_task_timeline),
        )
        // Events
        .route("/events", get(routes::events::list_events))
        // Metrics & cost
        .route("/metrics", get(routes::metrics::get_metrics))
        .route("/cost", get(routes::cost::get_cost))
        .route("/cost/calls", get(routes::cost::get_cost_calls))
        .route("/cost/timeseries", get(routes::cost::get_cost_timeseries))
        .route("/llm-calls", get(routes::cost::get_cost_calls))
        // Projects
        .route(
            "/projects",
            get(routes::projects::list_projects).post(routes::projects::create_project),
        )
        .route(
            "/projects/:project_id",
            get(routes::projects::get_project)
                .put(routes::projects::update_project)
                .delete(routes::projects::delete_project),
        )
        .route(
            "/projects/:project_id/archive",
            post(routes::projects::archive_project),
        )
        .route(
            "/projects/:project_id/unarchive",
            post(routes::projects::unarchive_project),
        )
        .route(
            "/projects/:project_id/merge",
            post(routes::projects::merge_project),
        )
        .route(
            "/projects/:project_id/agents",
            get(routes::projects::list_project_agents).post(routes::projects::add_project_agent),
        )
        .route(
            "/projects/:project_id/agents/:agent_id",
            delete(routes::projects::remove_project_agent),
        )
        // Alerts
        .route(
            "/alerts/rules",
            get(routes::alerts::list_rules).post(routes::alerts::create_rule),
        )
        .route(
            "/alerts/rules/:rule_id",
            put(routes::alerts::update_rule).delete(routes::alerts::delete_rule),
        )
        .route("/alerts/history", get(routes::alerts::list_history))
        // API keys
        .route(
            "/api-keys",
            get(routes::keys::list_keys).post(routes::keys::create_key),
        )
        .route("/api-keys/:key_id", delete(routes::keys::revoke_key))
        // Pricing admin
        .route(
            "/admin/pricing",
            get(routes::pricing::list_pricing).post(routes::pricing::add_pricing),
        )
        .route(
            "/admin/pricing/:pattern",
            put(routes::pricing::update_pricing).delete(routes::pricing::delete_pricing),
        )
        // Streaming (auth via query token inside the handler)
        .route("/stream", get(ws::ws_handler));

    Router::new()
        .route("/health", get(routes::health::health))
        .nest("/v1", v1)
        // Request order: auth first, then the rate limiter (layers run
        // outside-in, so the auth layer is added last).
        .layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
        .layer(from_fn_with_state(state.clone(), middleware::auth_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Create the development tenant and API key when `HIVEBOARD_DEV_KEY` is
/// set. Idempotent across restarts.
pub async fn bootstrap_dev_tenant(state: &AppState, dev_key: &str) -> ApiResult<()> {
    if !dev_key.starts_with("hb_") {
        return Err(ApiError::validation(
            "HIVEBOARD_DEV_KEY must start with 'hb_'",
        ));
    }

    let key_hash = hash_key(dev_key);
    if state.storage.authenticate(&key_hash).await?.is_some() {
        tracing::debug!("Dev tenant already bootstrapped");
        return Ok(());
    }

    if state.storage.get_tenant("dev").await?.is_none() {
        state
            .storage
            .create_tenant("dev", "Development", "dev", TenantPlan::Free)
            .await?;
    }

    let key_type = dev_key
        .split('_')
        .nth(1)
        .and_then(|t| t.parse::<KeyType>().ok())
        .unwrap_or(KeyType::Live);
    state
        .storage
        .create_api_key(ApiKeyRecord {
            key_id: Uuid::new_v4().to_string(),
            tenant_id: "dev".to_string(),
            key_hash,
            key_prefix: dev_key.chars().take(12).collect(),
            key_type,
            label: Some("dev bootstrap".to_string()),
            created_at: chrono::Utc::now(),
            last_used_at: None,
            revoked_at: None,
            is_active: true,
        })
        .await?;
    tracing::info!("Bootstrapped development tenant 'dev'");
    Ok(())
}

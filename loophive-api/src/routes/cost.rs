//! Cost read endpoints, filtered over `llm_call` payloads.

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;

use loophive_core::{CostSummary, CostTimeBucket, LlmCallRecord, Page};
use loophive_storage::{CostCallsQuery, CostQuery};

use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::routes::{clamp_limit, parse_time_param};
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct CostParams {
    pub agent_id: Option<String>,
    pub project_id: Option<String>,
    pub range: Option<String>,
    pub interval: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CostCallsParams {
    pub agent_id: Option<String>,
    pub project_id: Option<String>,
    pub model: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

pub async fn get_cost(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<CostParams>,
) -> ApiResult<Json<CostSummary>> {
    let summary = state
        .storage
        .cost_summary(
            &auth.tenant_id,
            CostQuery {
                agent_id: params.agent_id,
                project_id: params.project_id,
                range: params.range.unwrap_or_else(|| "24h".to_string()),
                interval: None,
            },
            Utc::now(),
        )
        .await?;
    Ok(Json(summary))
}

/// Shared by `GET /v1/cost/calls` and `GET /v1/llm-calls`.
pub async fn get_cost_calls(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<CostCallsParams>,
) -> ApiResult<Json<Page<LlmCallRecord>>> {
    let page = state
        .storage
        .cost_calls(
            &auth.tenant_id,
            CostCallsQuery {
                agent_id: params.agent_id,
                project_id: params.project_id,
                model: params.model,
                since: parse_time_param(params.since.as_deref()),
                until: parse_time_param(params.until.as_deref()),
                limit: clamp_limit(params.limit, 50),
                cursor: params.cursor,
            },
        )
        .await?;
    Ok(Json(page))
}

pub async fn get_cost_timeseries(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<CostParams>,
) -> ApiResult<Json<Vec<CostTimeBucket>>> {
    let buckets = state
        .storage
        .cost_timeseries(
            &auth.tenant_id,
            CostQuery {
                agent_id: params.agent_id,
                project_id: params.project_id,
                range: params.range.unwrap_or_else(|| "24h".to_string()),
                interval: params.interval,
            },
            Utc::now(),
        )
        .await?;
    Ok(Json(buckets))
}

//! Aggregate metrics endpoint.

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;

use loophive_core::MetricsResponse;
use loophive_storage::MetricsQuery;

use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct MetricsParams {
    pub range: Option<String>,
    pub interval: Option<String>,
    pub group_by: Option<String>,
    pub agent_id: Option<String>,
    pub project_id: Option<String>,
    pub environment: Option<String>,
}

pub async fn get_metrics(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<MetricsParams>,
) -> ApiResult<Json<MetricsResponse>> {
    let response = state
        .storage
        .get_metrics(
            &auth.tenant_id,
            MetricsQuery {
                agent_id: params.agent_id,
                project_id: params.project_id,
                environment: params.environment,
                range: params.range.unwrap_or_else(|| "1h".to_string()),
                interval: params.interval,
                group_by: params.group_by,
            },
            Utc::now(),
        )
        .await?;
    Ok(Json(response))
}

//! Alert rule management and firing history.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use loophive_core::{AlertHistoryRecord, AlertRuleCreate, AlertRuleRecord, AlertRuleUpdate, Page};

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::routes::{clamp_limit, parse_time_param};
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct RuleListParams {
    pub project_id: Option<String>,
    pub is_enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct HistoryParams {
    pub rule_id: Option<String>,
    pub project_id: Option<String>,
    pub since: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

pub async fn list_rules(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<RuleListParams>,
) -> ApiResult<Json<JsonValue>> {
    let rules = state
        .storage
        .list_alert_rules(
            &auth.tenant_id,
            params.project_id.as_deref(),
            params.is_enabled,
        )
        .await?;
    Ok(Json(json!({"data": rules})))
}

pub async fn create_rule(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<AlertRuleCreate>,
) -> ApiResult<(StatusCode, Json<AlertRuleRecord>)> {
    if body.name.is_empty() {
        return Err(ApiError::validation("name is required"));
    }
    let rule = state.storage.create_alert_rule(&auth.tenant_id, body).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn update_rule(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(rule_id): Path<String>,
    Json(updates): Json<AlertRuleUpdate>,
) -> ApiResult<Json<AlertRuleRecord>> {
    let rule = state
        .storage
        .update_alert_rule(&auth.tenant_id, &rule_id, updates)
        .await?
        .ok_or_else(|| ApiError::not_found("Alert rule"))?;
    Ok(Json(rule))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(rule_id): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    let deleted = state
        .storage
        .delete_alert_rule(&auth.tenant_id, &rule_id)
        .await?;
    if !deleted {
        return Err(ApiError::not_found("Alert rule"));
    }
    Ok(Json(json!({"status": "deleted"})))
}

pub async fn list_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Page<AlertHistoryRecord>>> {
    let page = state
        .storage
        .list_alert_history(
            &auth.tenant_id,
            params.rule_id.as_deref(),
            params.project_id.as_deref(),
            parse_time_param(params.since.as_deref()),
            clamp_limit(params.limit, 50),
            params.cursor.as_deref(),
        )
        .await?;
    Ok(Json(page))
}

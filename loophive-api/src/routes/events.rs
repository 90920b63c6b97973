//! Raw event read endpoint.

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;

use loophive_core::{Event, Page};
use loophive_storage::EventQuery;

use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::routes::{clamp_limit, parse_csv, parse_time_param};
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct EventListParams {
    pub project_id: Option<String>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    /// Comma-separated event types.
    pub event_type: Option<String>,
    /// Comma-separated severities.
    pub severity: Option<String>,
    pub environment: Option<String>,
    pub group: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub exclude_heartbeats: Option<bool>,
    pub payload_kind: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

pub async fn list_events(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<EventListParams>,
) -> ApiResult<Json<Page<Event>>> {
    let page = state
        .storage
        .get_events(
            &auth.tenant_id,
            EventQuery {
                project_id: params.project_id,
                agent_id: params.agent_id,
                task_id: params.task_id,
                event_types: parse_csv(params.event_type.as_deref()),
                severities: parse_csv(params.severity.as_deref()),
                environment: params.environment,
                group: params.group,
                since: parse_time_param(params.since.as_deref()),
                until: parse_time_param(params.until.as_deref()),
                exclude_heartbeats: params.exclude_heartbeats.unwrap_or(true),
                payload_kind: params.payload_kind.as_deref().and_then(|k| k.parse().ok()),
                key_type: Some(auth.key_type),
                limit: clamp_limit(params.limit, 50),
                cursor: params.cursor,
            },
        )
        .await?;
    Ok(Json(page))
}

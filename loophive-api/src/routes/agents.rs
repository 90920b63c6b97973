//! Agent read endpoints: list, detail, per-agent pipeline, fleet pipeline.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use loophive_core::{
    derive_agent_status, to_iso, AgentRecord, AgentStatus, AgentSummary, FleetPipelineState,
    PipelineState,
};
use loophive_storage::AgentQuery;

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::routes::clamp_limit;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct AgentListParams {
    pub project_id: Option<String>,
    pub environment: Option<String>,
    pub group: Option<String>,
    /// Filter on derived status.
    pub status: Option<String>,
    /// last_seen (default) / attention / name.
    pub sort: Option<String>,
    pub limit: Option<usize>,
}

/// Convert a profile to the API summary with derived status and rolling
/// stats.
pub async fn agent_to_summary(
    state: &AppState,
    agent: &AgentRecord,
    now: DateTime<Utc>,
) -> ApiResult<AgentSummary> {
    let status = derive_agent_status(agent, now);
    let heartbeat_age = agent.last_heartbeat.map(|hb| (now - hb).num_seconds());
    let stats = state
        .storage
        .agent_hour_stats(&agent.tenant_id, &agent.agent_id, now)
        .await?;

    Ok(AgentSummary {
        agent_id: agent.agent_id.clone(),
        agent_type: agent.agent_type.clone(),
        agent_version: agent.agent_version.clone(),
        framework: agent.framework.clone(),
        runtime: agent.runtime.clone(),
        sdk_version: agent.sdk_version.clone(),
        environment: agent.environment.clone(),
        group: agent.group.clone(),
        derived_status: status,
        current_task_id: agent.last_task_id.clone(),
        current_project_id: agent.last_project_id.clone(),
        last_heartbeat: agent.last_heartbeat.map(to_iso),
        heartbeat_age_seconds: heartbeat_age,
        is_stuck: status == AgentStatus::Stuck,
        stuck_threshold_seconds: agent.stuck_threshold_seconds,
        first_seen: Some(to_iso(agent.first_seen)),
        last_seen: Some(to_iso(agent.last_seen)),
        stats_1h: stats,
    })
}

pub async fn list_agents(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<AgentListParams>,
) -> ApiResult<Json<JsonValue>> {
    let now = Utc::now();
    let agents = state
        .storage
        .list_agents(
            &auth.tenant_id,
            AgentQuery {
                project_id: params.project_id,
                environment: params.environment,
                group: params.group,
                limit: clamp_limit(params.limit, 50),
            },
        )
        .await?;

    let mut summaries = Vec::with_capacity(agents.len());
    for agent in &agents {
        summaries.push(agent_to_summary(&state, agent, now).await?);
    }

    // Filter on derived status after derivation.
    if let Some(status) = params.status.as_deref().and_then(|s| s.parse::<AgentStatus>().ok()) {
        summaries.retain(|s| s.derived_status == status);
    }

    match params.sort.as_deref() {
        Some("attention") => {
            summaries.sort_by_key(|s| s.derived_status.attention_rank());
        }
        Some("name") => summaries.sort_by(|a, b| a.agent_id.cmp(&b.agent_id)),
        // list_agents already sorts by last_seen descending
        _ => {}
    }

    Ok(Json(json!({"data": summaries})))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentSummary>> {
    let agent = state
        .storage
        .get_agent(&auth.tenant_id, &agent_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Agent"))?;
    let summary = agent_to_summary(&state, &agent, Utc::now()).await?;
    Ok(Json(summary))
}

pub async fn get_agent_pipeline(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<PipelineState>> {
    let pipeline = state.storage.get_pipeline(&auth.tenant_id, &agent_id).await?;
    Ok(Json(pipeline))
}

pub async fn get_fleet_pipeline(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<FleetPipelineState>> {
    let fleet = state.storage.get_fleet_pipeline(&auth.tenant_id).await?;
    Ok(Json(fleet))
}

//! Project management: CRUD, archive/unarchive, merge, and the
//! project-agent membership sub-resource.
//!
//! Deletion is archival with event reassignment; the default project can
//! never be deleted.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use loophive_core::{ProjectCreate, ProjectRecord, ProjectUpdate};
use loophive_storage::AgentQuery;

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::routes::agents::agent_to_summary;
use crate::state::AppState;
use crate::types::{AddProjectAgentRequest, ProjectMergeRequest};

#[derive(Debug, Deserialize, Default)]
pub struct ProjectListParams {
    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct DeleteProjectParams {
    /// Slug or id of the project to reassign events to.
    pub reassign_to: Option<String>,
}

pub async fn list_projects(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<ProjectListParams>,
) -> ApiResult<Json<JsonValue>> {
    let projects = state
        .storage
        .list_projects(&auth.tenant_id, params.include_archived)
        .await?;
    Ok(Json(json!({"data": projects})))
}

pub async fn create_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<ProjectCreate>,
) -> ApiResult<(StatusCode, Json<ProjectRecord>)> {
    if body.slug.is_empty() {
        return Err(ApiError::validation("slug is required"));
    }
    // Manually created projects never carry the auto_created flag.
    let project = state
        .storage
        .create_project(
            &auth.tenant_id,
            ProjectCreate {
                auto_created: false,
                ..body
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ProjectRecord>> {
    let project = state
        .storage
        .get_project(&auth.tenant_id, &project_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Project"))?;
    Ok(Json(project))
}

pub async fn update_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Json(updates): Json<ProjectUpdate>,
) -> ApiResult<Json<ProjectRecord>> {
    let project = state
        .storage
        .get_project(&auth.tenant_id, &project_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Project"))?;
    let updated = state
        .storage
        .update_project(&auth.tenant_id, &project.project_id, updates)
        .await?
        .ok_or_else(|| ApiError::not_found("Project"))?;
    Ok(Json(updated))
}

/// Delete = reassign events to the target (default project unless
/// overridden), then archive.
pub async fn delete_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Query(params): Query<DeleteProjectParams>,
) -> ApiResult<Json<JsonValue>> {
    let project = state
        .storage
        .get_project(&auth.tenant_id, &project_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Project"))?;
    if project.slug == "default" {
        return Err(ApiError::new(
            ErrorCode::CannotDeleteDefault,
            "Cannot delete the default project",
        ));
    }

    let target_slug = params.reassign_to.unwrap_or_else(|| "default".to_string());
    let target = state.storage.get_project(&auth.tenant_id, &target_slug).await?;
    let mut events_moved = 0;
    if let Some(target) = &target {
        if target.project_id != project.project_id {
            events_moved = state
                .storage
                .reassign_events(&auth.tenant_id, &project.project_id, &target.project_id)
                .await?;
        }
    }

    state
        .storage
        .set_project_archived(&auth.tenant_id, &project.project_id, true)
        .await?;
    Ok(Json(json!({
        "status": "deleted",
        "events_reassigned": events_moved,
        "reassigned_to": target_slug,
    })))
}

pub async fn archive_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    set_archived(&state, &auth, &project_id, true).await?;
    Ok(Json(json!({"status": "archived"})))
}

pub async fn unarchive_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    set_archived(&state, &auth, &project_id, false).await?;
    Ok(Json(json!({"status": "unarchived"})))
}

async fn set_archived(
    state: &AppState,
    auth: &AuthContext,
    project_id: &str,
    archived: bool,
) -> ApiResult<()> {
    let project = state
        .storage
        .get_project(&auth.tenant_id, project_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Project"))?;
    let updated = state
        .storage
        .set_project_archived(&auth.tenant_id, &project.project_id, archived)
        .await?;
    if !updated {
        return Err(ApiError::not_found("Project"));
    }
    Ok(())
}

/// Merge source into target: reassign all events and junction rows, then
/// archive the source.
pub async fn merge_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Json(body): Json<ProjectMergeRequest>,
) -> ApiResult<Json<JsonValue>> {
    let source = state
        .storage
        .get_project(&auth.tenant_id, &project_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Source project"))?;
    let target = state
        .storage
        .get_project(&auth.tenant_id, &body.target_slug)
        .await?
        .ok_or_else(|| {
            ApiError::new(
                ErrorCode::NotFound,
                format!("Target project '{}' not found", body.target_slug),
            )
        })?;
    if source.project_id == target.project_id {
        return Err(ApiError::new(
            ErrorCode::InvalidMerge,
            "Cannot merge a project into itself",
        ));
    }
    if target.is_archived {
        return Err(ApiError::new(
            ErrorCode::InvalidMerge,
            "Cannot merge into an archived project",
        ));
    }

    let events_moved = state
        .storage
        .reassign_events(&auth.tenant_id, &source.project_id, &target.project_id)
        .await?;

    // Carry the junction membership over to the target.
    let members = state
        .storage
        .list_project_agents(&auth.tenant_id, &source.project_id)
        .await?;
    for member in members {
        state
            .storage
            .upsert_project_agent(&auth.tenant_id, &target.project_id, &member.agent_id)
            .await?;
        state
            .storage
            .remove_project_agent(&auth.tenant_id, &source.project_id, &member.agent_id)
            .await?;
    }

    state
        .storage
        .set_project_archived(&auth.tenant_id, &source.project_id, true)
        .await?;

    Ok(Json(json!({
        "status": "merged",
        "source_slug": source.slug,
        "target_slug": target.slug,
        "events_moved": events_moved,
    })))
}

// ============================================================================
// PROJECT-AGENT MEMBERSHIP
// ============================================================================

pub async fn list_project_agents(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    let project = state
        .storage
        .get_project(&auth.tenant_id, &project_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Project"))?;
    let agents = state
        .storage
        .list_agents(
            &auth.tenant_id,
            AgentQuery {
                project_id: Some(project.project_id),
                ..AgentQuery::new()
            },
        )
        .await?;
    let now = Utc::now();
    let mut summaries = Vec::with_capacity(agents.len());
    for agent in &agents {
        summaries.push(agent_to_summary(&state, agent, now).await?);
    }
    Ok(Json(json!({"data": summaries})))
}

pub async fn add_project_agent(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Json(body): Json<AddProjectAgentRequest>,
) -> ApiResult<(StatusCode, Json<JsonValue>)> {
    if body.agent_id.is_empty() {
        return Err(ApiError::validation("agent_id is required"));
    }
    let project = state
        .storage
        .get_project(&auth.tenant_id, &project_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Project"))?;
    state
        .storage
        .upsert_project_agent(&auth.tenant_id, &project.project_id, &body.agent_id)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({"status": "added"}))))
}

pub async fn remove_project_agent(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((project_id, agent_id)): Path<(String, String)>,
) -> ApiResult<Json<JsonValue>> {
    let project = state
        .storage
        .get_project(&auth.tenant_id, &project_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Project"))?;
    state
        .storage
        .remove_project_agent(&auth.tenant_id, &project.project_id, &agent_id)
        .await?;
    Ok(Json(json!({"status": "removed"})))
}

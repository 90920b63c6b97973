//! Task read endpoints: grouped task list and the per-task timeline with
//! action tree, error chains, and plan overlay.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;

use loophive_core::{
    derive_task_status, ActionNode, ErrorChainLink, Event, EventType, Page, PayloadKind,
    PlanOverlay, PlanOverlayStep, PlanProgress, TaskSummary, TimelineSummary,
};
use loophive_storage::{TaskQuery, TaskSort};

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::routes::{clamp_limit, parse_time_param};
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct TaskListParams {
    pub project_id: Option<String>,
    pub agent_id: Option<String>,
    pub task_type: Option<String>,
    pub status: Option<String>,
    pub environment: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<TaskListParams>,
) -> ApiResult<Json<Page<TaskSummary>>> {
    let page = state
        .storage
        .list_tasks(
            &auth.tenant_id,
            TaskQuery {
                agent_id: params.agent_id,
                project_id: params.project_id,
                task_type: params.task_type,
                status: params.status.as_deref().and_then(|s| s.parse().ok()),
                environment: params.environment,
                since: parse_time_param(params.since.as_deref()),
                until: parse_time_param(params.until.as_deref()),
                sort: params
                    .sort
                    .as_deref()
                    .map(TaskSort::parse)
                    .unwrap_or_default(),
                limit: clamp_limit(params.limit, 50),
                cursor: params.cursor,
            },
        )
        .await?;
    Ok(Json(page))
}

pub async fn get_task_timeline(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TimelineSummary>> {
    let events = state.storage.get_task_events(&auth.tenant_id, &task_id).await?;
    if events.is_empty() {
        return Err(ApiError::not_found("Task"));
    }
    Ok(Json(build_timeline(task_id, events)))
}

/// Assemble the timeline view from a task's chronologically ordered
/// events.
pub fn build_timeline(task_id: String, events: Vec<Event>) -> TimelineSummary {
    let event_types = events.iter().map(|e| e.event_type).collect();
    let derived = derive_task_status(&event_types);
    let first = &events[0];

    let mut duration_ms = None;
    let mut completed_at = None;
    let mut total_cost = 0.0;
    for event in &events {
        if matches!(
            event.event_type,
            EventType::TaskCompleted | EventType::TaskFailed
        ) {
            duration_ms = event.duration_ms;
            completed_at = Some(event.timestamp.clone());
        }
        if let Some(payload) = &event.payload {
            if payload.is_kind(PayloadKind::LlmCall) {
                total_cost += payload.data_f64("cost").unwrap_or(0.0);
            }
        }
    }

    TimelineSummary {
        task_id,
        task_run_id: first.task_run_id.clone(),
        agent_id: first.agent_id.clone(),
        project_id: first.project_id.clone(),
        task_type: first.task_type.clone(),
        derived_status: derived,
        started_at: first.timestamp.clone(),
        completed_at,
        duration_ms,
        total_cost: (total_cost > 0.0).then_some(total_cost),
        action_tree: build_action_tree(&events),
        error_chains: build_error_chains(&events),
        plan: build_plan_overlay(&events),
        events,
    }
}

/// Action forest keyed by `action_id`, linked via `parent_action_id`.
/// Name comes from the `action_started` payload; status and duration from
/// the closing event.
fn build_action_tree(events: &[Event]) -> Vec<ActionNode> {
    let mut nodes: HashMap<String, ActionNode> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for event in events {
        if !matches!(
            event.event_type,
            EventType::ActionStarted | EventType::ActionCompleted | EventType::ActionFailed
        ) {
            continue;
        }
        let Some(action_id) = &event.action_id else {
            continue;
        };
        let node = nodes.entry(action_id.clone()).or_insert_with(|| {
            order.push(action_id.clone());
            ActionNode {
                action_id: action_id.clone(),
                parent_action_id: event.parent_action_id.clone(),
                name: None,
                status: None,
                duration_ms: None,
                events: Vec::new(),
                children: Vec::new(),
            }
        });
        node.events.push(event.clone());
        match event.event_type {
            EventType::ActionStarted => {
                // The SDK puts action_name at the payload top level, with
                // data.action_name and summary as fallbacks.
                node.name = event.payload.as_ref().and_then(|p| {
                    p.extra
                        .get("action_name")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .or_else(|| p.data_str("action_name").map(str::to_string))
                        .or_else(|| p.summary.clone())
                });
            }
            EventType::ActionCompleted => {
                node.status = Some(event.status.clone().unwrap_or_else(|| "completed".into()));
                node.duration_ms = event.duration_ms;
            }
            EventType::ActionFailed => {
                node.status = Some(event.status.clone().unwrap_or_else(|| "failed".into()));
                node.duration_ms = event.duration_ms;
            }
            _ => unreachable!(),
        }
    }

    // Nest children under parents, preserving first-seen order. A node is
    // a root when its parent is absent from the forest.
    let mut children_of: HashMap<String, Vec<String>> = HashMap::new();
    let mut roots: Vec<String> = Vec::new();
    for id in &order {
        match nodes[id]
            .parent_action_id
            .clone()
            .filter(|parent| nodes.contains_key(parent))
        {
            Some(parent) => children_of.entry(parent).or_default().push(id.clone()),
            None => roots.push(id.clone()),
        }
    }

    fn assemble(
        id: &str,
        nodes: &mut HashMap<String, ActionNode>,
        children_of: &HashMap<String, Vec<String>>,
    ) -> Option<ActionNode> {
        let mut node = nodes.remove(id)?;
        if let Some(children) = children_of.get(id) {
            for child_id in children {
                if let Some(child) = assemble(child_id, nodes, children_of) {
                    node.children.push(child);
                }
            }
        }
        Some(node)
    }

    roots
        .iter()
        .filter_map(|id| assemble(id, &mut nodes, &children_of))
        .collect()
}

/// Expose retry/escalation events that link back to a prior event.
fn build_error_chains(events: &[Event]) -> Vec<ErrorChainLink> {
    events
        .iter()
        .filter(|e| {
            matches!(
                e.event_type,
                EventType::RetryStarted | EventType::Escalated
            ) && e.parent_event_id.is_some()
        })
        .map(|e| ErrorChainLink {
            event_id: e.event_id.clone(),
            event_type: e.event_type,
            parent_event_id: e.parent_event_id.clone().expect("filtered above"),
            timestamp: e.timestamp.clone(),
            payload: e.payload.clone(),
        })
        .collect()
}

/// At most one plan per task, accumulated from plan_created and plan_step
/// custom events. Each step inherits its last plan_step action.
fn build_plan_overlay(events: &[Event]) -> Option<PlanOverlay> {
    let mut steps: Vec<PlanOverlayStep> = Vec::new();
    let mut goal: Option<String> = None;
    let mut total = 0usize;
    let mut completed = 0usize;
    let mut step_actions: HashMap<usize, (String, String)> = HashMap::new();

    for event in events {
        let Some(payload) = &event.payload else {
            continue;
        };
        match payload.well_known_kind() {
            Some(PayloadKind::PlanCreated) => {
                goal = payload.summary.clone();
                steps = payload
                    .data_field("steps")
                    .and_then(|s| s.as_array())
                    .map(|raw_steps| {
                        raw_steps
                            .iter()
                            .enumerate()
                            .map(|(i, step)| PlanOverlayStep {
                                index: step
                                    .get("index")
                                    .and_then(|v| v.as_u64())
                                    .map(|v| v as usize)
                                    .unwrap_or(i),
                                description: step
                                    .get("description")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or_default()
                                    .to_string(),
                                action: None,
                                started_at: None,
                                completed_at: None,
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                total = steps.len();
            }
            Some(PayloadKind::PlanStep) => {
                if let Some(step_total) = payload.data_i64("total_steps") {
                    total = step_total.max(0) as usize;
                }
                let index = payload.data_i64("step_index").map(|i| i.max(0) as usize);
                let action = payload.data_str("action").map(str::to_string);
                if let (Some(index), Some(action)) = (index, action) {
                    if action == "completed" {
                        completed += 1;
                    }
                    step_actions.insert(index, (action, event.timestamp.clone()));
                }
            }
            _ => {}
        }
    }

    for step in steps.iter_mut() {
        if let Some((action, timestamp)) = step_actions.get(&step.index) {
            step.action = Some(action.clone());
            match action.as_str() {
                "completed" => step.completed_at = Some(timestamp.clone()),
                "started" => step.started_at = Some(timestamp.clone()),
                _ => {}
            }
        }
    }

    if steps.is_empty() && total == 0 {
        return None;
    }
    Some(PlanOverlay {
        goal,
        steps,
        progress: PlanProgress { completed, total },
    })
}

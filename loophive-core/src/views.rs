//! Derived-view models returned by the query layer.
//!
//! Everything here is computed read-time from the event log and the agent
//! cache; none of it is persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{AgentStatus, Event, EventType, TaskStatus};

// ============================================================================
// PAGINATION
// ============================================================================

/// Opaque-cursor pagination info. The cursor is the id of the last
/// returned row; `has_more` is true iff the match set exceeded the limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PaginationInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

/// Generic paginated response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub pagination: PaginationInfo,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            pagination: PaginationInfo::default(),
        }
    }
}

// ============================================================================
// AGENTS
// ============================================================================

/// Rolling one-hour stats for an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentHourStats {
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    /// Tasks completed in the window.
    pub throughput: usize,
    /// From the latest queue snapshot.
    pub queue_depth: i64,
    /// From the pipeline's active issues.
    pub active_issues: usize,
}

/// Agent as returned by `GET /v1/agents`, enriched with derived status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub agent_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_version: Option<String>,
    pub environment: String,
    pub group: String,
    pub derived_status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_age_seconds: Option<i64>,
    pub is_stuck: bool,
    pub stuck_threshold_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    #[serde(default)]
    pub stats_1h: AgentHourStats,
}

// ============================================================================
// TASKS
// ============================================================================

/// Task as returned by `GET /v1/tasks`, grouped from events by task id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_run_id: Option<String>,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub derived_status: TaskStatus,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    pub action_count: usize,
    pub error_count: usize,
    pub has_escalation: bool,
    pub has_human_intervention: bool,
    pub llm_call_count: usize,
    pub total_tokens_in: i64,
    pub total_tokens_out: i64,
}

// ============================================================================
// TASK TIMELINE
// ============================================================================

/// One node in the action tree. Forest keyed by `action_id`, linked via
/// `parent_action_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionNode {
    pub action_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_action_id: Option<String>,
    /// From the `action_started` payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// From the closing event (success or failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub events: Vec<Event>,
    pub children: Vec<ActionNode>,
}

/// A causal link exposed by the timeline for retry/escalation events that
/// reference a prior event in the same task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorChainLink {
    pub event_id: String,
    pub event_type: EventType,
    pub parent_event_id: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<crate::Payload>,
}

/// A plan step enriched with its latest `plan_step` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOverlayStep {
    pub index: usize,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlanProgress {
    pub completed: usize,
    pub total: usize,
}

/// Plan overlay accumulated from `plan_created` and `plan_step` events;
/// at most one per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOverlay {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    pub steps: Vec<PlanOverlayStep>,
    pub progress: PlanProgress,
}

/// `GET /v1/tasks/{id}/timeline` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineSummary {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_run_id: Option<String>,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    pub derived_status: TaskStatus,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    /// Chronologically ordered.
    pub events: Vec<Event>,
    pub action_tree: Vec<ActionNode>,
    pub error_chains: Vec<ErrorChainLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanOverlay>,
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MetricsSummary {
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub escalated: usize,
    /// Count of agents currently deriving to stuck.
    pub stuck: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_cost_per_task: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TimeseriesBucket {
    pub timestamp: String,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_duration_ms: Option<i64>,
    pub cost: f64,
    pub error_count: usize,
    pub throughput: usize,
}

/// One row of a `group_by = agent | model` metrics breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MetricsGroup {
    pub key: String,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub total_cost: f64,
}

/// `GET /v1/metrics` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub range: String,
    pub interval: String,
    pub summary: MetricsSummary,
    pub timeseries: Vec<TimeseriesBucket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<MetricsGroup>>,
}

// ============================================================================
// COST
// ============================================================================

/// One by-agent or by-model cost breakdown row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CostBreakdownRow {
    pub key: String,
    pub cost: f64,
    pub call_count: usize,
    pub tokens_in: i64,
    pub tokens_out: i64,
}

/// `GET /v1/cost` response, filtered over `llm_call` payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CostSummary {
    pub total_cost: f64,
    pub call_count: usize,
    pub total_tokens_in: i64,
    pub total_tokens_out: i64,
    pub by_agent: Vec<CostBreakdownRow>,
    pub by_model: Vec<CostBreakdownRow>,
    /// Sum of developer-reported costs.
    pub reported_cost: f64,
    /// Sum of server-estimated costs.
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CostTimeBucket {
    pub timestamp: String,
    pub cost: f64,
    pub call_count: usize,
    pub tokens_in: i64,
    pub tokens_out: i64,
}

/// Individual LLM call row for `GET /v1/cost/calls` and `GET /v1/llm-calls`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCallRecord {
    pub event_id: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub timestamp: String,
    pub name: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_out: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// "reported", "estimated", or absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_model_matched: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_preview: Option<String>,
}

// ============================================================================
// PIPELINE
// ============================================================================

/// `GET /v1/agents/{id}/pipeline` response: the derived view of an agent's
/// work. Queue/todo/issue entries are loosely typed JSON because the
/// underlying payload data is free-form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub agent_id: String,
    /// Latest queue snapshot data with `snapshot_at` attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<JsonValue>,
    pub todos: Vec<JsonValue>,
    pub scheduled: Vec<JsonValue>,
    pub issues: Vec<JsonValue>,
}

impl PipelineState {
    /// Queue depth from the latest snapshot, 0 when absent.
    pub fn queue_depth(&self) -> i64 {
        self.queue
            .as_ref()
            .and_then(|q| q.get("depth"))
            .and_then(|d| d.as_i64())
            .unwrap_or(0)
    }
}

/// Per-agent rollup within the fleet pipeline view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentPipelineSummary {
    pub agent_id: String,
    pub queue_depth: i64,
    pub active_todos: usize,
    pub active_issues: usize,
    pub scheduled_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PipelineTotals {
    pub queue_depth: i64,
    pub active_todos: usize,
    pub active_issues: usize,
    pub scheduled_count: usize,
}

/// `GET /v1/pipeline` response: fleet-level aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FleetPipelineState {
    pub totals: PipelineTotals,
    pub agents: Vec<AgentPipelineSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pipeline_queue_depth() {
        let state = PipelineState {
            agent_id: "a1".into(),
            queue: Some(json!({"depth": 7, "snapshot_at": "2026-02-10T14:00:00Z"})),
            todos: vec![],
            scheduled: vec![],
            issues: vec![],
        };
        assert_eq!(state.queue_depth(), 7);

        let empty = PipelineState {
            agent_id: "a1".into(),
            queue: None,
            todos: vec![],
            scheduled: vec![],
            issues: vec![],
        };
        assert_eq!(empty.queue_depth(), 0);
    }

    #[test]
    fn test_page_empty() {
        let page: Page<TaskSummary> = Page::empty();
        assert!(page.data.is_empty());
        assert!(!page.pagination.has_more);
        assert!(page.pagination.cursor.is_none());
    }
}

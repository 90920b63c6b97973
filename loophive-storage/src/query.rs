//! Query parameter shapes accepted by the storage trait.
//!
//! These mirror the HTTP filter parameters one-to-one so route handlers
//! stay thin, and they keep trait method signatures stable as filters grow.

use chrono::{DateTime, Utc};
use loophive_core::{EventType, KeyType, PayloadKind, Severity, TaskStatus};
use serde::{Deserialize, Serialize};

/// Filters for `GET /v1/events`. Time range is inclusive lower bound,
/// exclusive upper bound.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub project_id: Option<String>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    /// Multiple types allowed (comma-separated on the wire).
    pub event_types: Option<Vec<EventType>>,
    /// Multiple severities allowed (comma-separated on the wire).
    pub severities: Option<Vec<Severity>>,
    pub environment: Option<String>,
    pub group: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Defaults to true on the events endpoint.
    pub exclude_heartbeats: bool,
    pub payload_kind: Option<PayloadKind>,
    /// Visibility: live keys do not see test-key events.
    pub key_type: Option<KeyType>,
    pub limit: usize,
    pub cursor: Option<String>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self {
            exclude_heartbeats: true,
            limit: 50,
            ..Default::default()
        }
    }
}

/// Sort orders for the task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSort {
    #[default]
    Newest,
    Oldest,
    Duration,
    Cost,
}

impl TaskSort {
    pub fn parse(s: &str) -> Self {
        match s {
            "oldest" => TaskSort::Oldest,
            "duration" => TaskSort::Duration,
            "cost" => TaskSort::Cost,
            _ => TaskSort::Newest,
        }
    }
}

/// Filters for `GET /v1/tasks`.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub agent_id: Option<String>,
    pub project_id: Option<String>,
    pub task_type: Option<String>,
    pub status: Option<TaskStatus>,
    pub environment: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub sort: TaskSort,
    pub limit: usize,
    pub cursor: Option<String>,
}

impl TaskQuery {
    pub fn new() -> Self {
        Self {
            limit: 50,
            ..Default::default()
        }
    }
}

/// Filters for `GET /v1/agents`.
#[derive(Debug, Clone, Default)]
pub struct AgentQuery {
    pub project_id: Option<String>,
    pub environment: Option<String>,
    pub group: Option<String>,
    pub limit: usize,
}

impl AgentQuery {
    pub fn new() -> Self {
        Self {
            limit: 50,
            ..Default::default()
        }
    }
}

/// Filters for `GET /v1/metrics`.
#[derive(Debug, Clone, Default)]
pub struct MetricsQuery {
    pub agent_id: Option<String>,
    pub project_id: Option<String>,
    pub environment: Option<String>,
    /// Named window: 1h / 6h / 24h / 7d / 30d.
    pub range: String,
    /// Bucket size; auto-derived from `range` when absent.
    pub interval: Option<String>,
    /// "agent" or "model".
    pub group_by: Option<String>,
}

/// Filters for `GET /v1/cost` and `GET /v1/cost/timeseries`.
#[derive(Debug, Clone, Default)]
pub struct CostQuery {
    pub agent_id: Option<String>,
    pub project_id: Option<String>,
    pub range: String,
    pub interval: Option<String>,
}

/// Filters for `GET /v1/cost/calls` / `GET /v1/llm-calls`.
#[derive(Debug, Clone, Default)]
pub struct CostCallsQuery {
    pub agent_id: Option<String>,
    pub project_id: Option<String>,
    pub model: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
    pub cursor: Option<String>,
}

impl CostCallsQuery {
    pub fn new() -> Self {
        Self {
            limit: 50,
            ..Default::default()
        }
    }
}

/// Result of one retention prune pass. TTL strictly dominates cold: an
/// event outside its tenant's TTL is counted as `ttl_pruned` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PruneStats {
    pub ttl_pruned: usize,
    pub cold_pruned: usize,
    pub total_pruned: usize,
}

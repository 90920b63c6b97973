//! Typed `payload.data` shapes for the seven well-known payload kinds.
//!
//! The SDK constructs these; the backend reads payloads loosely (field by
//! field) so partially-populated data never breaks derivation.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ============================================================================
// LLM CALL
// ============================================================================

/// `payload.data` for `kind = "llm_call"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LlmCallData {
    /// Logical call identifier
    pub name: String,
    /// Model identifier
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_out: Option<i64>,
    /// Cost in USD
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
    /// `"reported"` or `"estimated"`; set by enrichment, never the SDK.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_source: Option<String>,
    /// Pricing pattern matched when cost was estimated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_model_matched: Option<String>,
}

// ============================================================================
// QUEUE SNAPSHOT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QueueItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// high / normal / low
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// human / webhook / heartbeat / scheduled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QueueProcessing {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<i64>,
}

/// `payload.data` for `kind = "queue_snapshot"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QueueSnapshotData {
    pub depth: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_age_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<QueueItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing: Option<QueueProcessing>,
}

// ============================================================================
// TODO
// ============================================================================

/// `payload.data` for `kind = "todo"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TodoData {
    /// Stable identifier
    pub todo_id: String,
    /// created / completed / failed / dismissed / deferred
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_by: Option<String>,
}

// ============================================================================
// SCHEDULED
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScheduledItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run: Option<String>,
    /// 5m / 1h / daily / weekly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// success / failure / skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<String>,
}

/// `payload.data` for `kind = "scheduled"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScheduledData {
    pub items: Vec<ScheduledItem>,
}

// ============================================================================
// PLANS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Zero-based
    pub index: usize,
    pub description: String,
}

/// `payload.data` for `kind = "plan_created"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlanCreatedData {
    pub steps: Vec<PlanStep>,
    /// 0 for the initial plan, increments on replan
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,
}

/// `payload.data` for `kind = "plan_step"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlanStepData {
    /// Zero-based
    pub step_index: usize,
    pub total_steps: usize,
    /// started / completed / failed / skipped
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turns: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_revision: Option<i64>,
}

// ============================================================================
// ISSUE
// ============================================================================

/// `payload.data` for `kind = "issue"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IssueData {
    /// critical / high / medium / low
    pub severity: String,
    /// Stable id; if absent the server groups by summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    /// permissions / connectivity / configuration / data_quality /
    /// rate_limit / other
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<JsonValue>,
    /// reported (default) / resolved / dismissed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occurrence_count: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_llm_call_data_omits_unset_fields() {
        let data = LlmCallData {
            name: "reason".into(),
            model: "claude-haiku-4-5".into(),
            tokens_in: Some(1000),
            tokens_out: Some(500),
            ..Default::default()
        };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "reason",
                "model": "claude-haiku-4-5",
                "tokens_in": 1000,
                "tokens_out": 500
            })
        );
    }

    #[test]
    fn test_plan_step_data_round_trip() {
        let data = PlanStepData {
            step_index: 2,
            total_steps: 5,
            action: "completed".into(),
            turns: Some(3),
            tokens: None,
            plan_revision: Some(0),
        };
        let value = serde_json::to_value(&data).unwrap();
        let back: PlanStepData = serde_json::from_value(value).unwrap();
        assert_eq!(back, data);
    }
}

//! Stored entity records: one struct per table, plus create/update shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::{AgentStatus, EventType, KeyType, TenantPlan, DEFAULT_STUCK_THRESHOLD_SECONDS};

// ============================================================================
// TENANTS
// ============================================================================

/// Isolation boundary. Owns projects, keys, agents, events, and alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub tenant_id: String,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub plan: TenantPlan,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub settings: Map<String, JsonValue>,
}

// ============================================================================
// API KEYS
// ============================================================================

/// Authentication credential. The raw key is never stored, only its
/// SHA-256 hash and a visible prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub key_id: String,
    pub tenant_id: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub key_type: KeyType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Minimal info returned from the authentication lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyInfo {
    pub key_id: String,
    pub tenant_id: String,
    pub key_type: KeyType,
}

// ============================================================================
// PROJECTS
// ============================================================================

/// Logical grouping within a tenant; unique by (tenant, slug).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub project_id: String,
    pub tenant_id: String,
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: Map<String, JsonValue>,
    #[serde(default)]
    pub is_archived: bool,
    /// True when materialized by the ingestion pipeline.
    #[serde(default)]
    pub auto_created: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Project creation shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectCreate {
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: Map<String, JsonValue>,
    /// Set by the ingestion pipeline when materializing unknown slugs.
    #[serde(default)]
    pub auto_created: bool,
}

impl ProjectCreate {
    /// A project named after its slug, as materialized by ingestion.
    pub fn auto(slug: impl Into<String>) -> Self {
        let slug = slug.into();
        Self {
            name: slug.clone(),
            slug,
            description: None,
            settings: Map::new(),
            auto_created: true,
        }
    }
}

/// Partial project update; `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProjectUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Map<String, JsonValue>>,
}

// ============================================================================
// AGENT PROFILES
// ============================================================================

/// Cache of the last-known state of an agent, keyed by (tenant, agent).
/// Upserted on every batch, never deleted. `previous_status` is recorded
/// at every upsert so status transitions can be broadcast; it is the sole
/// piece of derived state that is ever written down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub tenant_id: String,
    #[serde(default = "default_agent_type")]
    pub agent_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_version: Option<String>,
    #[serde(default = "crate::event::default_environment")]
    pub environment: String,
    #[serde(default = "crate::event::default_group")]
    pub group: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_type: Option<EventType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_project_id: Option<String>,
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold_seconds: i64,
    #[serde(default = "default_true")]
    pub is_registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<AgentStatus>,
}

fn default_agent_type() -> String {
    "general".to_string()
}

fn default_stuck_threshold() -> i64 {
    DEFAULT_STUCK_THRESHOLD_SECONDS
}

fn default_true() -> bool {
    true
}

/// Per-batch profile delta computed by the ingestion pipeline and applied
/// atomically by the storage upsert.
#[derive(Debug, Clone, Default)]
pub struct AgentUpsert {
    pub agent_type: Option<String>,
    pub agent_version: Option<String>,
    pub framework: Option<String>,
    pub runtime: Option<String>,
    pub sdk_version: Option<String>,
    pub environment: Option<String>,
    pub group: Option<String>,
    /// Max event timestamp in the batch.
    pub last_seen: DateTime<Utc>,
    /// Same as `last_seen` when the batch contained a heartbeat.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Event type of the chronologically latest event in the batch.
    pub last_event_type: Option<EventType>,
    pub last_task_id: Option<String>,
    pub last_project_id: Option<String>,
    pub stuck_threshold_seconds: Option<i64>,
}

// ============================================================================
// PROJECT-AGENT JUNCTION
// ============================================================================

/// Materialized (tenant, project, agent) triple, created on any ingested
/// event that names both a project and an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectAgentRecord {
    pub tenant_id: String,
    pub project_id: String,
    pub agent_id: String,
    pub added_at: DateTime<Utc>,
}

// ============================================================================
// ALERT RULES & HISTORY
// ============================================================================

/// Tenant-scoped alert rule. `project_id = None` means tenant-wide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRuleRecord {
    pub rule_id: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub name: String,
    pub condition_type: crate::AlertConditionType,
    #[serde(default)]
    pub condition_config: Map<String, JsonValue>,
    #[serde(default)]
    pub filters: Map<String, JsonValue>,
    #[serde(default)]
    pub actions: Vec<JsonValue>,
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: i64,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_cooldown() -> i64 {
    300
}

/// Alert rule creation shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRuleCreate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub condition_type: crate::AlertConditionType,
    #[serde(default)]
    pub condition_config: Map<String, JsonValue>,
    #[serde(default)]
    pub filters: Map<String, JsonValue>,
    #[serde(default)]
    pub actions: Vec<JsonValue>,
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: i64,
}

/// Partial alert rule update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AlertRuleUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_config: Option<Map<String, JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Map<String, JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_enabled: Option<bool>,
}

/// Immutable record of a rule firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertHistoryRecord {
    pub alert_id: String,
    pub tenant_id: String,
    pub rule_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub fired_at: DateTime<Utc>,
    /// Condition values at firing time.
    #[serde(default)]
    pub condition_snapshot: Map<String, JsonValue>,
    #[serde(default)]
    pub actions_taken: Vec<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_task_id: Option<String>,
}

// ============================================================================
// PRICING
// ============================================================================

/// Global (not tenant-scoped) pricing entry. `model_pattern` matches
/// case-insensitively, exact first then longest prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingEntry {
    pub model_pattern: String,
    pub provider: String,
    /// USD per million input tokens
    pub input_per_m: f64,
    /// USD per million output tokens
    pub output_per_m: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_agent_record_defaults_on_deserialize() {
        let rec: AgentRecord = serde_json::from_value(json!({
            "agent_id": "a1",
            "tenant_id": "t1",
            "first_seen": "2026-02-10T14:00:00Z",
            "last_seen": "2026-02-10T14:00:00Z"
        }))
        .unwrap();
        assert_eq!(rec.agent_type, "general");
        assert_eq!(rec.stuck_threshold_seconds, 300);
        assert!(rec.is_registered);
        assert!(rec.previous_status.is_none());
    }

    #[test]
    fn test_project_create_auto() {
        let create = ProjectCreate::auto("new-slug");
        assert_eq!(create.name, "new-slug");
        assert_eq!(create.slug, "new-slug");
        assert!(create.auto_created);
    }

    #[test]
    fn test_api_key_record_wire_shape() {
        let rec = ApiKeyRecord {
            key_id: "k1".into(),
            tenant_id: "t1".into(),
            key_hash: "deadbeef".into(),
            key_prefix: "hb_live_0123".into(),
            key_type: KeyType::Live,
            label: Some("ci".into()),
            created_at: Utc::now(),
            last_used_at: None,
            revoked_at: None,
            is_active: true,
        };
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value["key_type"], "live");
        assert!(value.get("revoked_at").is_none());
    }
}

//! The canonical event schema and the ingest wire shapes.
//!
//! Events are immutable once stored. The SDK ships compact `IngestEvent`s
//! plus one `BatchEnvelope` per batch; the ingestion pipeline expands them
//! into fully denormalized `Event`s (identity from the envelope, server-set
//! `received_at`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::{EventType, PayloadKind, Severity};

// ============================================================================
// PAYLOAD
// ============================================================================

/// Universal payload envelope: `{kind?, summary?, data?, tags?}`.
///
/// Well-known payloads set `kind` to one of the seven [`PayloadKind`]
/// values; generic payloads may omit it. Emitters are free to attach
/// additional top-level keys (e.g. `action_name` on action events), which
/// round-trip through `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Payload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Payload {
    /// The parsed well-known kind, if `kind` is set and recognized.
    pub fn well_known_kind(&self) -> Option<PayloadKind> {
        self.kind.as_deref().and_then(|k| k.parse().ok())
    }

    /// Whether this payload is a well-known kind.
    pub fn is_kind(&self, kind: PayloadKind) -> bool {
        self.kind.as_deref() == Some(kind.as_str())
    }

    /// Read a field out of `data`, if `data` is an object.
    pub fn data_field(&self, field: &str) -> Option<&JsonValue> {
        self.data.as_ref()?.as_object()?.get(field)
    }

    /// Read a string field out of `data`.
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data_field(field)?.as_str()
    }

    /// Read a numeric field out of `data` as f64.
    pub fn data_f64(&self, field: &str) -> Option<f64> {
        self.data_field(field)?.as_f64()
    }

    /// Read a numeric field out of `data` as i64.
    pub fn data_i64(&self, field: &str) -> Option<i64> {
        self.data_field(field)?.as_i64()
    }
}

// ============================================================================
// BATCH ENVELOPE
// ============================================================================

/// Agent identity and runtime metadata, sent once per ingest batch so
/// individual events stay compact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEnvelope {
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_version: Option<String>,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_group")]
    pub group: String,
}

impl BatchEnvelope {
    /// Minimal envelope with defaults, used by tests and simple callers.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: None,
            agent_version: None,
            framework: None,
            runtime: None,
            sdk_version: None,
            environment: default_environment(),
            group: default_group(),
        }
    }
}

pub(crate) fn default_environment() -> String {
    "production".to_string()
}

pub(crate) fn default_group() -> String {
    "default".to_string()
}

// ============================================================================
// STORED EVENT
// ============================================================================

/// Canonical stored event, fully denormalized after envelope expansion.
///
/// `timestamp` is the caller-supplied ISO 8601 instant and is kept
/// verbatim (it may even be unparseable; see `crate::parse_ts`).
/// `received_at` is server-set at ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    // Identity
    pub event_id: String,
    pub tenant_id: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,

    // Project context (null for agent-level events)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    // Time
    pub timestamp: String,
    pub received_at: String,

    // Grouping
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_group")]
    pub group: String,

    // Task context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    // Action nesting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_action_id: Option<String>,

    // Classification
    pub event_type: EventType,
    #[serde(default)]
    pub severity: Severity,

    // Outcome
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,

    // Causal linkage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<String>,

    // Content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,

    /// Type of the API key that ingested this event; controls read
    /// visibility (live keys do not see test-key events).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
}

impl Event {
    /// Timestamp parsed leniently; `None` when unparseable.
    pub fn parsed_timestamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        crate::parse_ts(&self.timestamp)
    }

    /// Whether the payload is the given well-known kind.
    pub fn payload_kind_is(&self, kind: PayloadKind) -> bool {
        self.payload.as_ref().is_some_and(|p| p.is_kind(kind))
    }
}

// ============================================================================
// INGEST WIRE SHAPES
// ============================================================================

/// Event as sent by the SDK, before server enrichment. Fields the server
/// fills from the envelope (tenant, agent identity, `received_at`) are
/// absent or optional here. `event_type` and `severity` stay raw strings
/// so validation can reject or warn instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IngestEvent {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Overrides the envelope agent when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_action_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

/// `POST /v1/ingest` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub envelope: BatchEnvelope,
    pub events: Vec<IngestEvent>,
}

/// Per-event rejection reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub error: String,
    pub message: String,
}

/// Advisory ingest warning (never a rejection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestWarning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub warning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_slug: Option<String>,
}

/// `POST /v1/ingest` response. Status is 200 when `rejected == 0`,
/// 207 otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IngestResponse {
    pub accepted: usize,
    pub rejected: usize,
    #[serde(default)]
    pub errors: Vec<IngestError>,
    #[serde(default)]
    pub warnings: Vec<IngestWarning>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_round_trip_preserves_extra_keys() {
        let raw = json!({
            "kind": "llm_call",
            "summary": "LLM reason",
            "data": {"name": "reason", "model": "claude-haiku-4-5"},
            "tags": ["llm"],
            "action_name": "score_lead"
        });
        let payload: Payload = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(payload.well_known_kind(), Some(PayloadKind::LlmCall));
        assert_eq!(
            payload.extra.get("action_name").and_then(|v| v.as_str()),
            Some("score_lead")
        );
        let back = serde_json::to_value(&payload).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn test_payload_data_accessors() {
        let payload: Payload = serde_json::from_value(json!({
            "kind": "llm_call",
            "data": {"model": "gpt-4o", "tokens_in": 120, "cost": 0.5}
        }))
        .unwrap();
        assert_eq!(payload.data_str("model"), Some("gpt-4o"));
        assert_eq!(payload.data_i64("tokens_in"), Some(120));
        assert_eq!(payload.data_f64("cost"), Some(0.5));
        assert_eq!(payload.data_str("missing"), None);
    }

    #[test]
    fn test_event_optional_fields_omitted_on_wire() {
        let event = Event {
            event_id: "e1".into(),
            tenant_id: "t1".into(),
            agent_id: "a1".into(),
            agent_type: None,
            project_id: None,
            timestamp: "2026-02-10T14:00:00Z".into(),
            received_at: "2026-02-10T14:00:01Z".into(),
            environment: "production".into(),
            group: "default".into(),
            task_id: None,
            task_type: None,
            task_run_id: None,
            correlation_id: None,
            action_id: None,
            parent_action_id: None,
            event_type: EventType::Heartbeat,
            severity: Severity::Debug,
            status: None,
            duration_ms: None,
            parent_event_id: None,
            payload: None,
            key_type: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("task_id"));
        assert!(!obj.contains_key("payload"));
        assert_eq!(obj["event_type"], "heartbeat");
        assert_eq!(obj["severity"], "debug");
    }

    #[test]
    fn test_ingest_event_tolerates_unknown_event_type() {
        let raw = json!({
            "event_id": "e2",
            "timestamp": "2026-02-10T14:00:01Z",
            "event_type": "bogus"
        });
        let ev: IngestEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(ev.event_type, "bogus");
        assert!(ev.event_type.parse::<EventType>().is_err());
    }

    #[test]
    fn test_envelope_defaults() {
        let env: BatchEnvelope = serde_json::from_value(json!({"agent_id": "a1"})).unwrap();
        assert_eq!(env.environment, "production");
        assert_eq!(env.group, "default");
    }
}

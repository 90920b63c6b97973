//! Enumerations and constants shared across the backend and SDK.
//!
//! Single source of truth for the 13 event types, 7 well-known payload
//! kinds, severity ladder, API key types, derived statuses, tenant plans,
//! and field-size limits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ParseEnumError;

// ============================================================================
// EVENT TYPES
// ============================================================================

/// The 13 canonical event types.
///
/// Layer 0 is agent lifecycle, layer 1 structured execution, layer 2
/// narrative telemetry plus the `custom` escape hatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Layer 0 - agent lifecycle
    AgentRegistered,
    Heartbeat,

    // Layer 1 - structured execution
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    ActionStarted,
    ActionCompleted,
    ActionFailed,

    // Layer 2 - narrative telemetry
    RetryStarted,
    Escalated,
    ApprovalRequested,
    ApprovalReceived,
    #[default]
    Custom,
}

impl EventType {
    /// All valid event types, for validation.
    pub const ALL: [EventType; 13] = [
        EventType::AgentRegistered,
        EventType::Heartbeat,
        EventType::TaskStarted,
        EventType::TaskCompleted,
        EventType::TaskFailed,
        EventType::ActionStarted,
        EventType::ActionCompleted,
        EventType::ActionFailed,
        EventType::RetryStarted,
        EventType::Escalated,
        EventType::ApprovalRequested,
        EventType::ApprovalReceived,
        EventType::Custom,
    ];

    /// Wire representation (`snake_case`).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AgentRegistered => "agent_registered",
            EventType::Heartbeat => "heartbeat",
            EventType::TaskStarted => "task_started",
            EventType::TaskCompleted => "task_completed",
            EventType::TaskFailed => "task_failed",
            EventType::ActionStarted => "action_started",
            EventType::ActionCompleted => "action_completed",
            EventType::ActionFailed => "action_failed",
            EventType::RetryStarted => "retry_started",
            EventType::Escalated => "escalated",
            EventType::ApprovalRequested => "approval_requested",
            EventType::ApprovalReceived => "approval_received",
            EventType::Custom => "custom",
        }
    }

    /// Severity assigned when an event arrives without one.
    pub fn default_severity(&self) -> Severity {
        match self {
            EventType::Heartbeat => Severity::Debug,
            EventType::TaskFailed | EventType::ActionFailed => Severity::Error,
            EventType::RetryStarted | EventType::Escalated => Severity::Warn,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("event_type", s))
    }
}

// ============================================================================
// SEVERITY
// ============================================================================

/// Event severity ladder. Ordering matters: `min_severity` stream filters
/// compare ranks, so variants are declared lowest-first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            _ => Err(ParseEnumError::new("severity", s)),
        }
    }
}

// ============================================================================
// WELL-KNOWN PAYLOAD KINDS
// ============================================================================

/// The 7 well-known `payload.kind` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    LlmCall,
    QueueSnapshot,
    Todo,
    Scheduled,
    PlanCreated,
    PlanStep,
    Issue,
}

impl PayloadKind {
    pub const ALL: [PayloadKind; 7] = [
        PayloadKind::LlmCall,
        PayloadKind::QueueSnapshot,
        PayloadKind::Todo,
        PayloadKind::Scheduled,
        PayloadKind::PlanCreated,
        PayloadKind::PlanStep,
        PayloadKind::Issue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::LlmCall => "llm_call",
            PayloadKind::QueueSnapshot => "queue_snapshot",
            PayloadKind::Todo => "todo",
            PayloadKind::Scheduled => "scheduled",
            PayloadKind::PlanCreated => "plan_created",
            PayloadKind::PlanStep => "plan_step",
            PayloadKind::Issue => "issue",
        }
    }

    /// Severity override applied after the event-type default.
    pub fn severity_override(&self) -> Option<Severity> {
        match self {
            PayloadKind::LlmCall => Some(Severity::Info),
            PayloadKind::QueueSnapshot => Some(Severity::Debug),
            _ => None,
        }
    }

    /// Recommended `data.*` fields; absence produces ingest warnings,
    /// never rejection.
    pub fn recommended_fields(&self) -> &'static [&'static str] {
        match self {
            PayloadKind::LlmCall => &["name", "model"],
            PayloadKind::QueueSnapshot => &["depth"],
            PayloadKind::Todo => &["todo_id", "action"],
            PayloadKind::Scheduled => &["items"],
            PayloadKind::PlanCreated => &["steps"],
            PayloadKind::PlanStep => &["step_index", "total_steps", "action"],
            PayloadKind::Issue => &["severity"],
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayloadKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PayloadKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("payload_kind", s))
    }
}

// ============================================================================
// API KEY TYPES
// ============================================================================

/// API key types. Read keys are forbidden from write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Live,
    Test,
    Read,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Live => "live",
            KeyType::Test => "test",
            KeyType::Read => "read",
        }
    }

    /// Whether this key may perform mutations.
    pub fn can_write(&self) -> bool {
        !matches!(self, KeyType::Read)
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(KeyType::Live),
            "test" => Ok(KeyType::Test),
            "read" => Ok(KeyType::Read),
            _ => Err(ParseEnumError::new("key_type", s)),
        }
    }
}

// ============================================================================
// DERIVED STATUSES
// ============================================================================

/// Derived agent status. Never persisted; computed read-time from the
/// agent profile and the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Processing,
    WaitingApproval,
    Error,
    Stuck,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Processing => "processing",
            AgentStatus::WaitingApproval => "waiting_approval",
            AgentStatus::Error => "error",
            AgentStatus::Stuck => "stuck",
        }
    }

    /// Sort rank for the `attention` ordering (most urgent first).
    pub fn attention_rank(&self) -> u8 {
        match self {
            AgentStatus::Stuck => 0,
            AgentStatus::Error => 1,
            AgentStatus::WaitingApproval => 2,
            AgentStatus::Processing => 3,
            AgentStatus::Idle => 4,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AgentStatus::Idle),
            "processing" => Ok(AgentStatus::Processing),
            "waiting_approval" => Ok(AgentStatus::WaitingApproval),
            "error" => Ok(AgentStatus::Error),
            "stuck" => Ok(AgentStatus::Stuck),
            _ => Err(ParseEnumError::new("agent_status", s)),
        }
    }
}

/// Derived task status, computed from the set of event types seen for a
/// task id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
    Escalated,
    Waiting,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Escalated => "escalated",
            TaskStatus::Waiting => "waiting",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "escalated" => Ok(TaskStatus::Escalated),
            "waiting" => Ok(TaskStatus::Waiting),
            _ => Err(ParseEnumError::new("task_status", s)),
        }
    }
}

// ============================================================================
// ALERT CONDITIONS
// ============================================================================

/// The six alert rule condition types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertConditionType {
    AgentStuck,
    TaskFailed,
    ErrorRate,
    DurationExceeded,
    HeartbeatLost,
    CostThreshold,
}

impl AlertConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertConditionType::AgentStuck => "agent_stuck",
            AlertConditionType::TaskFailed => "task_failed",
            AlertConditionType::ErrorRate => "error_rate",
            AlertConditionType::DurationExceeded => "duration_exceeded",
            AlertConditionType::HeartbeatLost => "heartbeat_lost",
            AlertConditionType::CostThreshold => "cost_threshold",
        }
    }
}

impl fmt::Display for AlertConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertConditionType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent_stuck" => Ok(AlertConditionType::AgentStuck),
            "task_failed" => Ok(AlertConditionType::TaskFailed),
            "error_rate" => Ok(AlertConditionType::ErrorRate),
            "duration_exceeded" => Ok(AlertConditionType::DurationExceeded),
            "heartbeat_lost" => Ok(AlertConditionType::HeartbeatLost),
            "cost_threshold" => Ok(AlertConditionType::CostThreshold),
            _ => Err(ParseEnumError::new("condition_type", s)),
        }
    }
}

// ============================================================================
// TENANT PLANS
// ============================================================================

/// Tenant plan tier. Determines event retention and quota limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TenantPlan {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl TenantPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantPlan::Free => "free",
            TenantPlan::Pro => "pro",
            TenantPlan::Enterprise => "enterprise",
        }
    }

    /// Event retention horizon in days.
    pub fn retention_days(&self) -> i64 {
        match self {
            TenantPlan::Free => 7,
            TenantPlan::Pro => 30,
            TenantPlan::Enterprise => 90,
        }
    }
}

impl fmt::Display for TenantPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantPlan {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(TenantPlan::Free),
            "pro" => Ok(TenantPlan::Pro),
            "enterprise" => Ok(TenantPlan::Enterprise),
            _ => Err(ParseEnumError::new("plan", s)),
        }
    }
}

// ============================================================================
// FIELD-SIZE LIMITS
// ============================================================================

pub const MAX_PAYLOAD_BYTES: usize = 32 * 1024;
pub const MAX_SUMMARY_CHARS: usize = 512;
pub const MAX_AGENT_ID_CHARS: usize = 256;
pub const MAX_TASK_ID_CHARS: usize = 256;
pub const MAX_ENVIRONMENT_CHARS: usize = 64;
pub const MAX_GROUP_CHARS: usize = 128;
pub const MAX_BATCH_EVENTS: usize = 500;
pub const MAX_BATCH_BYTES: usize = 1024 * 1024;

// ============================================================================
// RATE LIMITS & CONNECTION CAPS
// ============================================================================

/// Requests/second per key on the ingest path.
pub const RATE_LIMIT_INGEST: usize = 100;
/// Requests/second per key everywhere else.
pub const RATE_LIMIT_QUERY: usize = 30;
/// Concurrent WebSocket connections per API key.
pub const MAX_WEBSOCKET_CONNECTIONS: usize = 5;

/// Auto-created projects per tenant before routing to the default project.
pub const MAX_PROJECTS_PER_TENANT: usize = 50;

/// Default stuck threshold for agent profiles.
pub const DEFAULT_STUCK_THRESHOLD_SECONDS: i64 = 300;

// ============================================================================
// COLD-EVENT RETENTION
// ============================================================================

/// Retention horizon in seconds for heartbeat events (inside TTL).
pub const COLD_RETENTION_HEARTBEAT_SECONDS: i64 = 600;
/// Retention horizon in seconds for action_started events (inside TTL).
pub const COLD_RETENTION_ACTION_STARTED_SECONDS: i64 = 86_400;

/// Cold retention horizon for an event type, if it has one.
pub fn cold_retention_seconds(event_type: EventType) -> Option<i64> {
    match event_type {
        EventType::Heartbeat => Some(COLD_RETENTION_HEARTBEAT_SECONDS),
        EventType::ActionStarted => Some(COLD_RETENTION_ACTION_STARTED_SECONDS),
        _ => None,
    }
}

// ============================================================================
// TIME RANGES & INTERVALS
// ============================================================================

/// Named query windows accepted by the metrics and cost endpoints.
pub fn range_seconds(range: &str) -> Option<i64> {
    match range {
        "1h" => Some(3_600),
        "6h" => Some(21_600),
        "24h" => Some(86_400),
        "7d" => Some(604_800),
        "30d" => Some(2_592_000),
        _ => None,
    }
}

/// Bucket interval auto-derived from a named range.
pub fn auto_interval(range: &str) -> &'static str {
    match range {
        "1h" => "5m",
        "6h" => "15m",
        "24h" => "1h",
        "7d" => "6h",
        "30d" => "1d",
        _ => "5m",
    }
}

/// Bucket interval sizes in seconds.
pub fn interval_seconds(interval: &str) -> Option<i64> {
    match interval {
        "1m" => Some(60),
        "5m" => Some(300),
        "15m" => Some(900),
        "1h" => Some(3_600),
        "6h" => Some(21_600),
        "1d" => Some(86_400),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trip() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
        }
    }

    #[test]
    fn test_event_type_serde_wire_format() {
        let json = serde_json::to_string(&EventType::TaskStarted).unwrap();
        assert_eq!(json, "\"task_started\"");
        let back: EventType = serde_json::from_str("\"approval_requested\"").unwrap();
        assert_eq!(back, EventType::ApprovalRequested);
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        assert!("bogus".parse::<EventType>().is_err());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
    }

    #[test]
    fn test_severity_defaults() {
        assert_eq!(EventType::Heartbeat.default_severity(), Severity::Debug);
        assert_eq!(EventType::TaskFailed.default_severity(), Severity::Error);
        assert_eq!(EventType::RetryStarted.default_severity(), Severity::Warn);
        assert_eq!(EventType::Custom.default_severity(), Severity::Info);
    }

    #[test]
    fn test_payload_kind_severity_overrides() {
        assert_eq!(
            PayloadKind::QueueSnapshot.severity_override(),
            Some(Severity::Debug)
        );
        assert_eq!(PayloadKind::LlmCall.severity_override(), Some(Severity::Info));
        assert_eq!(PayloadKind::Issue.severity_override(), None);
    }

    #[test]
    fn test_key_type_write_permission() {
        assert!(KeyType::Live.can_write());
        assert!(KeyType::Test.can_write());
        assert!(!KeyType::Read.can_write());
    }

    #[test]
    fn test_plan_retention() {
        assert_eq!(TenantPlan::Free.retention_days(), 7);
        assert_eq!(TenantPlan::Pro.retention_days(), 30);
        assert_eq!(TenantPlan::Enterprise.retention_days(), 90);
    }

    #[test]
    fn test_cold_retention_only_heartbeat_and_action_started() {
        assert_eq!(cold_retention_seconds(EventType::Heartbeat), Some(600));
        assert_eq!(
            cold_retention_seconds(EventType::ActionStarted),
            Some(86_400)
        );
        assert_eq!(cold_retention_seconds(EventType::ActionCompleted), None);
        assert_eq!(cold_retention_seconds(EventType::TaskCompleted), None);
    }

    #[test]
    fn test_range_and_interval_tables() {
        assert_eq!(range_seconds("24h"), Some(86_400));
        assert_eq!(range_seconds("45m"), None);
        assert_eq!(auto_interval("7d"), "6h");
        assert_eq!(interval_seconds("15m"), Some(900));
    }

    #[test]
    fn test_attention_rank_order() {
        assert!(AgentStatus::Stuck.attention_rank() < AgentStatus::Error.attention_rank());
        assert!(AgentStatus::Error.attention_rank() < AgentStatus::Idle.attention_rank());
    }
}

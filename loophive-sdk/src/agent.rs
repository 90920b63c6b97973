//! The `Agent` instrumentation surface.
//!
//! An agent emits lifecycle events through the shared transport, runs an
//! optional background heartbeat thread, tracks a per-thread active task
//! slot for action inheritance, and offers convenience emitters for the
//! well-known payload kinds.
//!
//! Instrumentation never panics into the host application: callback
//! failures are caught and logged, emit failures are swallowed.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use serde_json::{json, Map, Value as JsonValue};
use uuid::Uuid;

use loophive_core::{
    to_iso, BatchEnvelope, EventType, IngestEvent, Payload, PayloadKind, Severity,
};

use crate::action::{current_action_id, ActionScope};
use crate::task::{Task, TaskContext, TaskOptions};
use crate::transport::Transport;

/// SDK identification sent in every envelope.
pub const SDK_VERSION: &str = concat!("loophive-rust-", env!("CARGO_PKG_VERSION"));

/// Callback returning an optional JSON payload (heartbeat extras, queue
/// snapshots).
pub type PayloadCallback = Box<dyn Fn() -> Option<JsonValue> + Send + Sync>;

/// Options for registering an agent.
pub struct AgentOptions {
    pub agent_type: String,
    pub version: Option<String>,
    pub framework: String,
    /// Zero disables the heartbeat thread.
    pub heartbeat_interval: Duration,
    pub stuck_threshold_seconds: i64,
    pub heartbeat_payload: Option<PayloadCallback>,
    pub queue_provider: Option<PayloadCallback>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            agent_type: "general".to_string(),
            version: None,
            framework: "custom".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            stuck_threshold_seconds: 300,
            heartbeat_payload: None,
            queue_provider: None,
        }
    }
}

/// Internal draft of an event before envelope expansion. Unset fields are
/// stripped on the wire.
#[derive(Default)]
pub(crate) struct EventDraft {
    pub event_type: EventType,
    pub task: Option<TaskContext>,
    pub action_id: Option<String>,
    pub parent_action_id: Option<String>,
    pub severity: Option<Severity>,
    pub status: Option<String>,
    pub duration_ms: Option<i64>,
    pub parent_event_id: Option<String>,
    pub payload: Option<Payload>,
}

pub(crate) struct AgentInner {
    pub agent_id: String,
    pub agent_type: String,
    pub version: Option<String>,
    pub framework: String,
    environment: String,
    group: String,
    stuck_threshold_seconds: i64,
    transport: Arc<Transport>,
    active_tasks: Mutex<HashMap<ThreadId, TaskContext>>,
    heartbeat_payload: Option<PayloadCallback>,
    queue_provider: Option<PayloadCallback>,
    hb_stop: Mutex<Option<mpsc::Sender<()>>>,
    hb_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AgentInner {
    fn envelope(&self) -> BatchEnvelope {
        BatchEnvelope {
            agent_id: self.agent_id.clone(),
            agent_type: Some(self.agent_type.clone()),
            agent_version: self.version.clone(),
            framework: Some(self.framework.clone()),
            runtime: Some("rust".to_string()),
            sdk_version: Some(SDK_VERSION.to_string()),
            environment: self.environment.clone(),
            group: self.group.clone(),
        }
    }

    /// Build and enqueue one event: fresh id, millisecond UTC timestamp,
    /// severity defaulted from the event type. Never fails.
    pub(crate) fn emit(&self, draft: EventDraft) {
        let severity = draft
            .severity
            .unwrap_or_else(|| draft.event_type.default_severity());
        let task = draft.task;
        let event = IngestEvent {
            event_id: Uuid::new_v4().to_string(),
            timestamp: to_iso(chrono::Utc::now()),
            event_type: draft.event_type.as_str().to_string(),
            project_id: task.as_ref().and_then(|t| t.project_id.clone()),
            agent_id: None,
            agent_type: None,
            task_id: task.as_ref().map(|t| t.task_id.clone()),
            task_type: task.as_ref().and_then(|t| t.task_type.clone()),
            task_run_id: task.as_ref().map(|t| t.task_run_id.clone()),
            correlation_id: task.as_ref().and_then(|t| t.correlation_id.clone()),
            action_id: draft.action_id,
            parent_action_id: draft.parent_action_id,
            severity: Some(severity.as_str().to_string()),
            status: draft.status,
            duration_ms: draft.duration_ms,
            parent_event_id: draft.parent_event_id,
            payload: draft.payload,
        };
        self.transport.enqueue(event, self.envelope());
    }

    // -- Per-thread active task slot --

    pub(crate) fn set_active_task(&self, context: TaskContext) {
        if let Ok(mut tasks) = self.active_tasks.lock() {
            tasks.insert(thread::current().id(), context);
        }
    }

    pub(crate) fn clear_active_task(&self) {
        if let Ok(mut tasks) = self.active_tasks.lock() {
            tasks.remove(&thread::current().id());
        }
    }

    pub(crate) fn active_task_context(&self) -> Option<TaskContext> {
        self.active_tasks
            .lock()
            .ok()
            .and_then(|tasks| tasks.get(&thread::current().id()).cloned())
    }

    // -- Heartbeat --

    fn emit_heartbeat(&self) {
        let payload = self.heartbeat_payload.as_ref().and_then(|callback| {
            match catch_unwind(AssertUnwindSafe(callback)) {
                Ok(value) => value.and_then(|v| serde_json::from_value::<Payload>(v).ok()),
                Err(_) => {
                    tracing::warn!(agent_id = %self.agent_id, "heartbeat_payload callback panicked");
                    None
                }
            }
        });
        self.emit(EventDraft {
            event_type: EventType::Heartbeat,
            payload,
            ..Default::default()
        });

        // Queue provider emits a separate queue_snapshot event.
        if let Some(provider) = &self.queue_provider {
            match catch_unwind(AssertUnwindSafe(provider)) {
                Ok(Some(data)) => self.emit_queue_snapshot_value(data),
                Ok(None) => {}
                Err(_) => {
                    tracing::warn!(agent_id = %self.agent_id, "queue_provider callback panicked");
                }
            }
        }
    }

    fn emit_queue_snapshot_value(&self, data: JsonValue) {
        let depth = data.get("depth").and_then(|d| d.as_i64()).unwrap_or(0);
        let age = data.get("oldest_age_seconds").and_then(|a| a.as_i64());
        let mut summary = format!("Queue: {depth} items");
        if let Some(age) = age {
            summary.push_str(&format!(", oldest {age}s"));
        }
        self.emit(EventDraft {
            event_type: EventType::Custom,
            payload: Some(Payload {
                kind: Some(PayloadKind::QueueSnapshot.as_str().to_string()),
                summary: Some(summary),
                data: Some(data),
                tags: Some(vec!["queue".to_string()]),
                extra: Map::new(),
            }),
            ..Default::default()
        });
    }

    fn stop_heartbeat(&self) {
        if let Ok(mut stop) = self.hb_stop.lock() {
            stop.take();
        }
        let handle = self.hb_handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

/// An instrumented agent. Cloning shares the same underlying state.
#[derive(Clone)]
pub struct Agent {
    pub(crate) inner: Arc<AgentInner>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("agent_id", &self.inner.agent_id)
            .field("agent_type", &self.inner.agent_type)
            .finish()
    }
}

impl Agent {
    pub(crate) fn new(
        agent_id: &str,
        transport: Arc<Transport>,
        environment: &str,
        group: &str,
        options: AgentOptions,
    ) -> Self {
        let inner = Arc::new(AgentInner {
            agent_id: agent_id.to_string(),
            agent_type: options.agent_type,
            version: options.version,
            framework: options.framework,
            environment: environment.to_string(),
            group: group.to_string(),
            stuck_threshold_seconds: options.stuck_threshold_seconds,
            transport,
            active_tasks: Mutex::new(HashMap::new()),
            heartbeat_payload: options.heartbeat_payload,
            queue_provider: options.queue_provider,
            hb_stop: Mutex::new(None),
            hb_handle: Mutex::new(None),
        });

        let agent = Self { inner };
        agent.register();
        agent.start_heartbeat(options.heartbeat_interval);
        agent
    }

    pub fn agent_id(&self) -> &str {
        &self.inner.agent_id
    }

    /// Emit `agent_registered`.
    fn register(&self) {
        self.inner.emit(EventDraft {
            event_type: EventType::AgentRegistered,
            payload: Some(Payload {
                kind: None,
                summary: Some(format!("Agent {} registered", self.inner.agent_id)),
                data: Some(json!({
                    "type": self.inner.agent_type,
                    "version": self.inner.version,
                    "framework": self.inner.framework,
                    "stuck_threshold": self.inner.stuck_threshold_seconds,
                })),
                tags: None,
                extra: Map::new(),
            }),
            ..Default::default()
        });
    }

    fn start_heartbeat(&self, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name(format!("loophive-hb-{}", self.inner.agent_id))
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => inner.emit_heartbeat(),
                    _ => break,
                }
            });
        match handle {
            Ok(handle) => {
                if let Ok(mut stop) = self.inner.hb_stop.lock() {
                    *stop = Some(stop_tx);
                }
                if let Ok(mut slot) = self.inner.hb_handle.lock() {
                    *slot = Some(handle);
                }
            }
            Err(error) => tracing::warn!(error = %error, "Failed to start heartbeat thread"),
        }
    }

    /// Stop the heartbeat thread. Called by SDK shutdown.
    pub(crate) fn stop_heartbeat(&self) {
        self.inner.stop_heartbeat();
    }

    // ========================================================================
    // TASKS
    // ========================================================================

    /// Start a task. The returned guard emits `task_completed` on normal
    /// drop and `task_failed` when dropped during a panic; call
    /// [`Task::complete`] / [`Task::fail`] for explicit outcomes.
    pub fn start_task(&self, task_id: &str, options: TaskOptions) -> Task {
        Task::start(self.inner.clone(), task_id, options)
    }

    /// Run a closure inside a task scope, mapping its `Result` onto the
    /// task lifecycle: `Ok` completes, `Err` fails (carrying the error's
    /// display text).
    pub fn with_task<T, E, F>(&self, task_id: &str, options: TaskOptions, f: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnOnce(&mut Task) -> Result<T, E>,
    {
        let mut task = self.start_task(task_id, options);
        match f(&mut task) {
            Ok(value) => {
                task.complete();
                Ok(value)
            }
            Err(error) => {
                task.fail(&error);
                Err(error)
            }
        }
    }

    // ========================================================================
    // ACTION TRACKING
    // ========================================================================

    /// Open an action scope. Nesting is tracked per thread; the scope
    /// closes (and emits) on drop.
    pub fn action(&self, name: &str) -> ActionScope {
        ActionScope::enter(self.inner.clone(), name)
    }

    /// Run a fallible closure as a tracked action: `Ok` closes the action
    /// as completed, `Err` as failed, and the error is returned untouched.
    /// A panic inside the closure is recorded as failure and re-raised.
    pub fn track<T, E, F>(&self, name: &str, f: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnOnce() -> Result<T, E>,
    {
        let scope = self.action(name);
        match f() {
            Ok(value) => {
                drop(scope);
                Ok(value)
            }
            Err(error) => {
                scope.fail(&error);
                Err(error)
            }
        }
    }

    // ========================================================================
    // AGENT-LEVEL EVENTS
    // ========================================================================

    /// Emit an agent-level event with no task context.
    pub fn event(&self, event_type: EventType, payload: Option<Payload>) {
        self.inner.emit(EventDraft {
            event_type,
            payload,
            ..Default::default()
        });
    }

    /// Record an agent-level LLM call.
    pub fn llm_call(&self, call: LlmCall) {
        let (payload, action_id) = call.into_payload();
        self.inner.emit(EventDraft {
            event_type: EventType::Custom,
            action_id,
            payload: Some(payload),
            ..Default::default()
        });
    }

    /// Report the current state of the agent's work queue.
    pub fn queue_snapshot(&self, data: JsonValue) {
        self.inner.emit_queue_snapshot_value(data);
    }

    /// Report a TODO lifecycle event.
    pub fn todo(&self, todo_id: &str, action: &str, summary: &str, extra: Option<JsonValue>) {
        let mut data = json!({"todo_id": todo_id, "action": action});
        if let Some(JsonValue::Object(extra)) = extra {
            for (key, value) in extra {
                data[key] = value;
            }
        }
        self.inner.emit(EventDraft {
            event_type: EventType::Custom,
            payload: Some(Payload {
                kind: Some(PayloadKind::Todo.as_str().to_string()),
                summary: Some(summary.to_string()),
                data: Some(data),
                tags: Some(vec!["todo".to_string(), action.to_string()]),
                extra: Map::new(),
            }),
            ..Default::default()
        });
    }

    /// Report the scheduled work items.
    pub fn scheduled(&self, items: Vec<JsonValue>) {
        let next_time = items
            .iter()
            .filter_map(|item| item.get("next_run").and_then(|v| v.as_str()))
            .min()
            .map(str::to_string);
        let mut summary = format!("{} scheduled items", items.len());
        if let Some(next) = next_time {
            let time_part = next.split('T').nth(1).unwrap_or(&next);
            summary.push_str(&format!(", next at {time_part}"));
        }
        self.inner.emit(EventDraft {
            event_type: EventType::Custom,
            payload: Some(Payload {
                kind: Some(PayloadKind::Scheduled.as_str().to_string()),
                summary: Some(summary),
                data: Some(json!({"items": items})),
                tags: Some(vec!["scheduled".to_string()]),
                extra: Map::new(),
            }),
            ..Default::default()
        });
    }

    /// Report an agent issue.
    pub fn report_issue(
        &self,
        summary: &str,
        severity: &str,
        issue_id: Option<&str>,
        category: Option<&str>,
        context: Option<JsonValue>,
    ) {
        let mut data = json!({"severity": severity, "action": "reported"});
        if let Some(issue_id) = issue_id {
            data["issue_id"] = json!(issue_id);
        }
        if let Some(category) = category {
            data["category"] = json!(category);
        }
        if let Some(context) = context {
            data["context"] = context;
        }
        let mut tags = vec!["issue".to_string()];
        if let Some(category) = category {
            tags.push(category.to_string());
        }
        self.inner.emit(EventDraft {
            event_type: EventType::Custom,
            payload: Some(Payload {
                kind: Some(PayloadKind::Issue.as_str().to_string()),
                summary: Some(summary.to_string()),
                data: Some(data),
                tags: Some(tags),
                extra: Map::new(),
            }),
            ..Default::default()
        });
    }

    /// Resolve a previously reported issue.
    pub fn resolve_issue(&self, summary: &str, issue_id: Option<&str>) {
        let mut data = json!({"severity": "low", "action": "resolved"});
        if let Some(issue_id) = issue_id {
            data["issue_id"] = json!(issue_id);
        }
        self.inner.emit(EventDraft {
            event_type: EventType::Custom,
            payload: Some(Payload {
                kind: Some(PayloadKind::Issue.as_str().to_string()),
                summary: Some(summary.to_string()),
                data: Some(data),
                tags: Some(vec!["issue".to_string(), "resolved".to_string()]),
                extra: Map::new(),
            }),
            ..Default::default()
        });
    }
}

// ============================================================================
// LLM CALL BUILDER
// ============================================================================

/// Builder for `llm_call` payloads, shared by the agent- and task-level
/// emitters.
#[derive(Debug, Clone, Default)]
pub struct LlmCall {
    pub name: String,
    pub model: String,
    pub tokens_in: Option<i64>,
    pub tokens_out: Option<i64>,
    pub cost: Option<f64>,
    pub duration_ms: Option<i64>,
    pub prompt_preview: Option<String>,
    pub response_preview: Option<String>,
    pub metadata: Option<JsonValue>,
}

impl LlmCall {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn tokens(mut self, tokens_in: i64, tokens_out: i64) -> Self {
        self.tokens_in = Some(tokens_in);
        self.tokens_out = Some(tokens_out);
        self
    }

    pub fn cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn previews(
        mut self,
        prompt_preview: impl Into<String>,
        response_preview: impl Into<String>,
    ) -> Self {
        self.prompt_preview = Some(prompt_preview.into());
        self.response_preview = Some(response_preview.into());
        self
    }

    pub fn metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Build the payload and capture the ambient action id.
    pub(crate) fn into_payload(self) -> (Payload, Option<String>) {
        let summary = build_llm_summary(
            &self.name,
            &self.model,
            self.tokens_in,
            self.tokens_out,
            self.cost,
        );
        let mut data = json!({"name": self.name, "model": self.model});
        if let Some(tokens_in) = self.tokens_in {
            data["tokens_in"] = json!(tokens_in);
        }
        if let Some(tokens_out) = self.tokens_out {
            data["tokens_out"] = json!(tokens_out);
        }
        if let Some(cost) = self.cost {
            data["cost"] = json!(cost);
        }
        if let Some(duration_ms) = self.duration_ms {
            data["duration_ms"] = json!(duration_ms);
        }
        if let Some(preview) = self.prompt_preview {
            data["prompt_preview"] = json!(preview);
        }
        if let Some(preview) = self.response_preview {
            data["response_preview"] = json!(preview);
        }
        if let Some(metadata) = self.metadata {
            data["metadata"] = metadata;
        }
        let payload = Payload {
            kind: Some(PayloadKind::LlmCall.as_str().to_string()),
            summary: Some(summary),
            data: Some(data),
            tags: Some(vec!["llm".to_string()]),
            extra: Map::new(),
        };
        (payload, current_action_id())
    }
}

/// Auto-generated LLM call summary: `name \u{2192} model (X in / Y out, $cost)`.
fn build_llm_summary(
    name: &str,
    model: &str,
    tokens_in: Option<i64>,
    tokens_out: Option<i64>,
    cost: Option<f64>,
) -> String {
    let mut summary = format!("{name} \u{2192} {model}");
    let mut details: Vec<String> = Vec::new();
    if let (Some(t_in), Some(t_out)) = (tokens_in, tokens_out) {
        details.push(format!("{t_in} in / {t_out} out"));
    }
    if let Some(cost) = cost {
        details.push(format!("${cost}"));
    }
    if !details.is_empty() {
        summary.push_str(&format!(" ({})", details.join(", ")));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_summary_full() {
        let summary =
            build_llm_summary("reason", "claude-sonnet-4", Some(1200), Some(350), Some(0.008));
        assert_eq!(summary, "reason \u{2192} claude-sonnet-4 (1200 in / 350 out, $0.008)");
    }

    #[test]
    fn test_llm_summary_without_details() {
        let summary = build_llm_summary("quick_call", "gpt-4", None, None, None);
        assert_eq!(summary, "quick_call \u{2192} gpt-4");
    }

    #[test]
    fn test_llm_call_payload_shape() {
        let (payload, _) = LlmCall::new("reason", "gpt-4o").tokens(100, 50).into_payload();
        assert_eq!(payload.kind.as_deref(), Some("llm_call"));
        assert_eq!(payload.data_str("model"), Some("gpt-4o"));
        assert_eq!(payload.data_i64("tokens_in"), Some(100));
        assert!(payload.data_f64("cost").is_none());
        assert_eq!(payload.tags.as_deref(), Some(&["llm".to_string()][..]));
    }
}

//! Task execution scopes.
//!
//! A [`Task`] guarantees exactly one lifecycle event: `task_started` at
//! creation and exactly one of `task_completed` / `task_failed` at the
//! end. Normal drop completes the task; a drop during panic unwinding
//! fails it with the panic recorded; `complete`/`fail` give explicit
//! control.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value as JsonValue};
use uuid::Uuid;

use loophive_core::{EventType, Payload, PayloadKind, Severity};

use crate::action::current_action_id;
use crate::agent::{AgentInner, EventDraft, LlmCall};

/// Context fields inherited by every event emitted inside a task.
#[derive(Debug, Clone)]
pub(crate) struct TaskContext {
    pub task_id: String,
    pub project_id: Option<String>,
    pub task_type: Option<String>,
    pub task_run_id: String,
    pub correlation_id: Option<String>,
}

/// Options for starting a task.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub project: Option<String>,
    pub task_type: Option<String>,
    /// Generated when absent.
    pub task_run_id: Option<String>,
    pub correlation_id: Option<String>,
}

impl TaskOptions {
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// A task execution scope.
pub struct Task {
    agent: Arc<AgentInner>,
    context: TaskContext,
    started: Instant,
    finished: bool,
    completion_payload: Option<JsonValue>,
    plan_total_steps: Option<usize>,
    plan_revision: i64,
}

impl Task {
    pub(crate) fn start(agent: Arc<AgentInner>, task_id: &str, options: TaskOptions) -> Self {
        let context = TaskContext {
            task_id: task_id.to_string(),
            project_id: options.project,
            task_type: options.task_type,
            task_run_id: options
                .task_run_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            correlation_id: options.correlation_id,
        };
        agent.set_active_task(context.clone());
        agent.emit(EventDraft {
            event_type: EventType::TaskStarted,
            task: Some(context.clone()),
            payload: Some(summary_payload(format!("Task {task_id} started"))),
            ..Default::default()
        });
        Self {
            agent,
            context,
            started: Instant::now(),
            finished: false,
            completion_payload: None,
            plan_total_steps: None,
            plan_revision: 0,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.context.task_id
    }

    pub fn task_run_id(&self) -> &str {
        &self.context.task_run_id
    }

    /// Attach payload data to the eventual completion event.
    pub fn set_payload(&mut self, payload: JsonValue) {
        self.completion_payload = Some(payload);
    }

    /// Complete the task with status `success`.
    pub fn complete(mut self) {
        self.finish(EventType::TaskCompleted, "success".to_string(), None);
    }

    /// Complete the task with an explicit status.
    pub fn complete_with_status(mut self, status: &str) {
        self.finish(EventType::TaskCompleted, status.to_string(), None);
    }

    /// Fail the task, recording the error's display text.
    pub fn fail(mut self, error: &dyn std::fmt::Display) {
        self.finish(
            EventType::TaskFailed,
            "failure".to_string(),
            Some(error.to_string()),
        );
    }

    fn finish(&mut self, event_type: EventType, status: String, error: Option<String>) {
        if self.finished {
            return;
        }
        self.finished = true;
        let duration_ms = self.started.elapsed().as_millis() as i64;

        let verb = if event_type == EventType::TaskCompleted {
            "completed"
        } else {
            "failed"
        };
        let mut payload = summary_payload(format!("Task {} {verb}", self.context.task_id));
        if let Some(error) = error {
            payload.extra.insert("error_message".into(), json!(error));
        }
        if let Some(JsonValue::Object(completion)) = self.completion_payload.take() {
            for (key, value) in completion {
                payload.extra.insert(key, value);
            }
        }

        self.agent.emit(EventDraft {
            event_type,
            task: Some(self.context.clone()),
            status: Some(status),
            duration_ms: Some(duration_ms),
            payload: Some(payload),
            ..Default::default()
        });
        self.agent.clear_active_task();
    }

    // ========================================================================
    // TASK-SCOPED EMITTERS
    // ========================================================================

    /// Emit a task-scoped event.
    pub fn event(
        &self,
        event_type: EventType,
        payload: Option<Payload>,
        severity: Option<Severity>,
        parent_event_id: Option<String>,
    ) {
        self.agent.emit(EventDraft {
            event_type,
            task: Some(self.context.clone()),
            severity,
            parent_event_id,
            payload,
            ..Default::default()
        });
    }

    /// Record an LLM call within this task, inheriting the current action
    /// context.
    pub fn llm_call(&self, call: LlmCall) {
        let (payload, action_id) = call.into_payload();
        self.agent.emit(EventDraft {
            event_type: EventType::Custom,
            task: Some(self.context.clone()),
            action_id,
            payload: Some(payload),
            ..Default::default()
        });
    }

    /// Record a plan created for this task.
    pub fn plan(&mut self, goal: &str, steps: &[&str]) {
        self.plan_with_revision(goal, steps, 0);
    }

    /// Record a replanned plan.
    pub fn plan_with_revision(&mut self, goal: &str, steps: &[&str], revision: i64) {
        self.plan_total_steps = Some(steps.len());
        self.plan_revision = revision;
        let step_data: Vec<JsonValue> = steps
            .iter()
            .enumerate()
            .map(|(index, description)| json!({"index": index, "description": description}))
            .collect();
        self.agent.emit(EventDraft {
            event_type: EventType::Custom,
            task: Some(self.context.clone()),
            payload: Some(Payload {
                kind: Some(PayloadKind::PlanCreated.as_str().to_string()),
                summary: Some(goal.to_string()),
                data: Some(json!({"steps": step_data, "revision": revision})),
                tags: Some(vec!["plan".to_string(), "created".to_string()]),
                extra: Map::new(),
            }),
            ..Default::default()
        });
    }

    /// Record a plan step update, inheriting total/revision from the last
    /// recorded plan unless overridden.
    pub fn plan_step(&self, step_index: usize, action: &str, summary: &str) {
        let mut data = json!({
            "step_index": step_index,
            "action": action,
            "plan_revision": self.plan_revision,
        });
        if let Some(total) = self.plan_total_steps {
            data["total_steps"] = json!(total);
        }
        self.agent.emit(EventDraft {
            event_type: EventType::Custom,
            task: Some(self.context.clone()),
            payload: Some(Payload {
                kind: Some(PayloadKind::PlanStep.as_str().to_string()),
                summary: Some(format!("Step {step_index} {action}: {summary}")),
                data: Some(data),
                tags: Some(vec!["plan".to_string(), format!("step_{action}")]),
                extra: Map::new(),
            }),
            ..Default::default()
        });
    }

    /// Emit a retry/escalation event linked to a prior event, inheriting
    /// the current action.
    pub fn linked_event(&self, event_type: EventType, parent_event_id: &str, payload: Option<Payload>) {
        self.agent.emit(EventDraft {
            event_type,
            task: Some(self.context.clone()),
            action_id: current_action_id(),
            parent_event_id: Some(parent_event_id.to_string()),
            payload,
            ..Default::default()
        });
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if std::thread::panicking() {
            self.finish(
                EventType::TaskFailed,
                "failure".to_string(),
                Some("panic".to_string()),
            );
        } else {
            self.finish(EventType::TaskCompleted, "success".to_string(), None);
        }
    }
}

fn summary_payload(summary: String) -> Payload {
    Payload {
        kind: None,
        summary: Some(summary),
        data: None,
        tags: None,
        extra: Map::new(),
    }
}

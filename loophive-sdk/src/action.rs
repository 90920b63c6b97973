//! Action tracking.
//!
//! Nesting is tracked through a thread-scoped current-action stack
//! maintained by RAII guards: each [`ActionScope`] pushes its id on
//! entry and pops it on drop, so a callee observes its caller as
//! `parent_action_id`. The guard emits `action_started` on entry and
//! `action_completed` / `action_failed` on exit - a panic unwinding
//! through the guard counts as failure and is never swallowed.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value as JsonValue};

use loophive_core::{EventType, Payload};

use crate::agent::AgentInner;

thread_local! {
    static ACTION_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// The innermost active action id on this thread, if any.
pub(crate) fn current_action_id() -> Option<String> {
    ACTION_STACK.with(|stack| stack.borrow().last().cloned())
}

fn push_action(action_id: &str) {
    ACTION_STACK.with(|stack| stack.borrow_mut().push(action_id.to_string()));
}

fn pop_action(action_id: &str) {
    ACTION_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        if stack.last().map(String::as_str) == Some(action_id) {
            stack.pop();
        } else {
            // Out-of-order drop (guards held across scopes); remove the
            // matching frame wherever it sits.
            stack.retain(|id| id != action_id);
        }
    });
}

/// RAII guard for one tracked action.
pub struct ActionScope {
    agent: Arc<AgentInner>,
    action_id: String,
    parent_action_id: Option<String>,
    name: String,
    started: Instant,
    finished: bool,
    extra: Option<Map<String, JsonValue>>,
}

impl ActionScope {
    pub(crate) fn enter(agent: Arc<AgentInner>, name: &str) -> Self {
        let action_id = uuid::Uuid::new_v4().to_string();
        let parent_action_id = current_action_id();
        push_action(&action_id);

        let scope = Self {
            agent,
            action_id,
            parent_action_id,
            name: name.to_string(),
            started: Instant::now(),
            finished: false,
            extra: None,
        };
        scope.emit_lifecycle(EventType::ActionStarted, None, None);
        scope
    }

    /// The generated action id (usable for correlating custom events).
    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    /// Attach additional payload keys to the closing event.
    pub fn set_payload(&mut self, extra: Map<String, JsonValue>) {
        self.extra = Some(extra);
    }

    /// Close the action as failed with an error description, consuming
    /// the guard.
    pub fn fail(mut self, error: impl std::fmt::Display) {
        self.finish(EventType::ActionFailed, Some(error.to_string()));
    }

    fn finish(&mut self, event_type: EventType, error: Option<String>) {
        if self.finished {
            return;
        }
        self.finished = true;
        pop_action(&self.action_id);
        let duration_ms = self.started.elapsed().as_millis() as i64;
        self.emit_lifecycle(event_type, Some(duration_ms), error);
    }

    fn emit_lifecycle(
        &self,
        event_type: EventType,
        duration_ms: Option<i64>,
        error: Option<String>,
    ) {
        let mut payload = Payload {
            extra: Map::new(),
            ..Default::default()
        };
        payload
            .extra
            .insert("action_name".to_string(), json!(self.name));
        if let Some(error) = error {
            payload
                .extra
                .insert("error_message".to_string(), json!(error));
        }
        if let Some(extra) = &self.extra {
            for (key, value) in extra {
                payload.extra.insert(key.clone(), value.clone());
            }
        }

        let status = match event_type {
            EventType::ActionCompleted => Some("success".to_string()),
            EventType::ActionFailed => Some("failure".to_string()),
            _ => None,
        };

        self.agent.emit(crate::agent::EventDraft {
            event_type,
            task: self.agent.active_task_context(),
            action_id: Some(self.action_id.clone()),
            parent_action_id: self.parent_action_id.clone(),
            status,
            duration_ms,
            payload: Some(payload),
            ..Default::default()
        });
    }
}

impl Drop for ActionScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if std::thread::panicking() {
            self.finish(EventType::ActionFailed, Some("panic".to_string()));
        } else {
            self.finish(EventType::ActionCompleted, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_push_pop() {
        assert!(current_action_id().is_none());
        push_action("a1");
        push_action("a2");
        assert_eq!(current_action_id().as_deref(), Some("a2"));
        pop_action("a2");
        assert_eq!(current_action_id().as_deref(), Some("a1"));
        pop_action("a1");
        assert!(current_action_id().is_none());
    }

    #[test]
    fn test_out_of_order_pop_removes_frame() {
        push_action("a1");
        push_action("a2");
        pop_action("a1");
        assert_eq!(current_action_id().as_deref(), Some("a2"));
        pop_action("a2");
        assert!(current_action_id().is_none());
    }
}

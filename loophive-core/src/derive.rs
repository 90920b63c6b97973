//! Status derivation.
//!
//! Single implementation, called from storage queries, REST responses,
//! the ingestion pipeline, and alert evaluation. Multiple copies of the
//! same cascade is a bug factory; this is the one source of truth.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::{AgentRecord, AgentStatus, EventType, TaskStatus};

/// Derive agent status from a profile and the current instant.
///
/// Priority cascade, first match wins:
/// 1. stuck: the later of last_heartbeat/last_seen is older than
///    `stuck_threshold_seconds`. An agent with a recent `last_seen` and no
///    heartbeat yet is not stuck.
/// 2. error: last event was task_failed or action_failed
/// 3. waiting_approval: last event was approval_requested
/// 4. processing: last event was task_started or action_started
/// 5. idle
pub fn derive_agent_status(agent: &AgentRecord, now: DateTime<Utc>) -> AgentStatus {
    let reference = match agent.last_heartbeat {
        Some(hb) => hb.max(agent.last_seen),
        None => agent.last_seen,
    };
    let age = (now - reference).num_seconds();
    if age > agent.stuck_threshold_seconds {
        return AgentStatus::Stuck;
    }

    match agent.last_event_type {
        Some(EventType::TaskFailed) | Some(EventType::ActionFailed) => AgentStatus::Error,
        Some(EventType::ApprovalRequested) => AgentStatus::WaitingApproval,
        Some(EventType::TaskStarted) | Some(EventType::ActionStarted) => AgentStatus::Processing,
        _ => AgentStatus::Idle,
    }
}

/// Derive task status from the set of event types present for a task.
///
/// 1. task_completed -> completed (completion wins over failure)
/// 2. task_failed -> failed
/// 3. escalated -> escalated
/// 4. approval_requested without approval_received -> waiting
/// 5. otherwise -> processing
pub fn derive_task_status(event_types: &HashSet<EventType>) -> TaskStatus {
    if event_types.contains(&EventType::TaskCompleted) {
        return TaskStatus::Completed;
    }
    if event_types.contains(&EventType::TaskFailed) {
        return TaskStatus::Failed;
    }
    if event_types.contains(&EventType::Escalated) {
        return TaskStatus::Escalated;
    }
    if event_types.contains(&EventType::ApprovalRequested)
        && !event_types.contains(&EventType::ApprovalReceived)
    {
        return TaskStatus::Waiting;
    }
    TaskStatus::Processing
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn agent(
        last_seen_age_secs: i64,
        heartbeat_age_secs: Option<i64>,
        last_event_type: Option<EventType>,
        now: DateTime<Utc>,
    ) -> AgentRecord {
        AgentRecord {
            agent_id: "a1".into(),
            tenant_id: "t1".into(),
            agent_type: "general".into(),
            agent_version: None,
            framework: None,
            runtime: None,
            sdk_version: None,
            environment: "production".into(),
            group: "default".into(),
            first_seen: now - Duration::hours(1),
            last_seen: now - Duration::seconds(last_seen_age_secs),
            last_heartbeat: heartbeat_age_secs.map(|s| now - Duration::seconds(s)),
            last_event_type,
            last_task_id: None,
            last_project_id: None,
            stuck_threshold_seconds: 300,
            is_registered: true,
            previous_status: None,
        }
    }

    #[test]
    fn test_stuck_when_both_marks_old() {
        let now = Utc::now();
        let a = agent(700, Some(700), Some(EventType::TaskStarted), now);
        assert_eq!(derive_agent_status(&a, now), AgentStatus::Stuck);
    }

    #[test]
    fn test_not_stuck_without_heartbeat_if_recently_seen() {
        let now = Utc::now();
        let a = agent(10, None, Some(EventType::Heartbeat), now);
        assert_eq!(derive_agent_status(&a, now), AgentStatus::Idle);
    }

    #[test]
    fn test_recent_activity_outweighs_stale_heartbeat() {
        // Heartbeat is old but the agent kept sending events.
        let now = Utc::now();
        let a = agent(10, Some(900), Some(EventType::TaskStarted), now);
        assert_eq!(derive_agent_status(&a, now), AgentStatus::Processing);
    }

    #[test]
    fn test_error_beats_processing() {
        let now = Utc::now();
        let a = agent(5, Some(5), Some(EventType::ActionFailed), now);
        assert_eq!(derive_agent_status(&a, now), AgentStatus::Error);
    }

    #[test]
    fn test_waiting_approval() {
        let now = Utc::now();
        let a = agent(5, Some(5), Some(EventType::ApprovalRequested), now);
        assert_eq!(derive_agent_status(&a, now), AgentStatus::WaitingApproval);
    }

    #[test]
    fn test_processing_states() {
        let now = Utc::now();
        for t in [EventType::TaskStarted, EventType::ActionStarted] {
            let a = agent(5, Some(5), Some(t), now);
            assert_eq!(derive_agent_status(&a, now), AgentStatus::Processing);
        }
    }

    #[test]
    fn test_idle_fallthrough() {
        let now = Utc::now();
        for t in [
            None,
            Some(EventType::Heartbeat),
            Some(EventType::TaskCompleted),
            Some(EventType::ApprovalReceived),
            Some(EventType::Custom),
        ] {
            let a = agent(5, Some(5), t, now);
            assert_eq!(derive_agent_status(&a, now), AgentStatus::Idle);
        }
    }

    #[test]
    fn test_task_completion_wins_over_failure() {
        let set: HashSet<EventType> = [
            EventType::TaskStarted,
            EventType::TaskFailed,
            EventType::TaskCompleted,
        ]
        .into();
        assert_eq!(derive_task_status(&set), TaskStatus::Completed);
    }

    #[test]
    fn test_task_failed() {
        let set: HashSet<EventType> = [EventType::TaskStarted, EventType::TaskFailed].into();
        assert_eq!(derive_task_status(&set), TaskStatus::Failed);
    }

    #[test]
    fn test_task_escalated() {
        let set: HashSet<EventType> = [EventType::TaskStarted, EventType::Escalated].into();
        assert_eq!(derive_task_status(&set), TaskStatus::Escalated);
    }

    #[test]
    fn test_task_waiting_until_approval_received() {
        let waiting: HashSet<EventType> =
            [EventType::TaskStarted, EventType::ApprovalRequested].into();
        assert_eq!(derive_task_status(&waiting), TaskStatus::Waiting);

        let resumed: HashSet<EventType> = [
            EventType::TaskStarted,
            EventType::ApprovalRequested,
            EventType::ApprovalReceived,
        ]
        .into();
        assert_eq!(derive_task_status(&resumed), TaskStatus::Processing);
    }

    #[test]
    fn test_task_processing_default() {
        let set: HashSet<EventType> = [EventType::TaskStarted, EventType::ActionStarted].into();
        assert_eq!(derive_task_status(&set), TaskStatus::Processing);
    }

    proptest! {
        /// An agent whose only activity is within the threshold never
        /// derives to stuck.
        #[test]
        fn prop_recent_agent_never_stuck(
            age in 0i64..300,
            hb_age in proptest::option::of(0i64..300),
        ) {
            let now = Utc::now();
            let a = agent(age, hb_age, Some(EventType::Heartbeat), now);
            prop_assert_ne!(derive_agent_status(&a, now), AgentStatus::Stuck);
        }

        /// Completion wins regardless of what else the task saw.
        #[test]
        fn prop_completed_dominates(extra in proptest::collection::hash_set(
            prop::sample::select(EventType::ALL.to_vec()), 0..8,
        )) {
            let mut set = extra;
            set.insert(EventType::TaskCompleted);
            prop_assert_eq!(derive_task_status(&set), TaskStatus::Completed);
        }
    }
}

//! Alerting engine - post-ingestion rule evaluation.
//!
//! After each accepted batch, every enabled rule for the tenant is
//! evaluated unless it fired within its cooldown. Six condition types:
//! agent_stuck, task_failed, error_rate, duration_exceeded,
//! heartbeat_lost, cost_threshold.
//!
//! Action dispatch is recorded for observability; webhook and email are
//! stubbed (logged, not sent) and the history record carries
//! `status = "logged"`.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value as JsonValue};
use uuid::Uuid;

use loophive_core::{
    derive_agent_status, AgentStatus, AlertConditionType, AlertHistoryRecord, Event, EventType,
};
use loophive_storage::{AgentQuery, CostQuery, EventQuery};

use crate::error::ApiResult;
use crate::state::AppState;

/// Outcome of one condition evaluation.
#[derive(Debug, Default)]
struct Firing {
    fired: bool,
    snapshot: Map<String, JsonValue>,
    related_agent_id: Option<String>,
    related_task_id: Option<String>,
}

impl Firing {
    fn none() -> Self {
        Self::default()
    }

    fn hit(snapshot: JsonValue) -> Self {
        Self {
            fired: true,
            snapshot: snapshot.as_object().cloned().unwrap_or_default(),
            related_agent_id: None,
            related_task_id: None,
        }
    }

    fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.related_agent_id = Some(agent_id.into());
        self
    }

    fn task(mut self, task_id: Option<&str>) -> Self {
        self.related_task_id = task_id.map(str::to_string);
        self
    }
}

/// Evaluate all enabled rules for a tenant against the newly ingested
/// batch and storage.
pub async fn evaluate_alerts(
    state: &AppState,
    tenant_id: &str,
    new_events: &[Event],
    now: DateTime<Utc>,
) -> ApiResult<()> {
    let rules = state
        .storage
        .list_alert_rules(tenant_id, None, Some(true))
        .await?;
    if rules.is_empty() {
        return Ok(());
    }

    for rule in rules {
        // Cooldown: skip rules that fired recently.
        if let Some(last) = state
            .storage
            .last_alert_for_rule(tenant_id, &rule.rule_id)
            .await?
        {
            if (now - last.fired_at).num_seconds() < rule.cooldown_seconds {
                continue;
            }
        }

        let config = &rule.condition_config;
        let firing = match rule.condition_type {
            AlertConditionType::AgentStuck => {
                check_agent_stuck(state, tenant_id, config, now).await?
            }
            AlertConditionType::TaskFailed => check_task_failed(new_events),
            AlertConditionType::ErrorRate => {
                check_error_rate(state, tenant_id, config, now).await?
            }
            AlertConditionType::DurationExceeded => check_duration_exceeded(new_events, config),
            AlertConditionType::HeartbeatLost => {
                check_heartbeat_lost(state, tenant_id, config, now).await?
            }
            AlertConditionType::CostThreshold => {
                check_cost_threshold(state, tenant_id, config, now).await?
            }
        };

        if firing.fired {
            let record = AlertHistoryRecord {
                alert_id: Uuid::new_v4().to_string(),
                tenant_id: tenant_id.to_string(),
                rule_id: rule.rule_id.clone(),
                project_id: rule.project_id.clone(),
                fired_at: now,
                condition_snapshot: firing.snapshot.clone(),
                actions_taken: dispatch_actions(&rule.actions, &firing.snapshot),
                related_agent_id: firing.related_agent_id.clone(),
                related_task_id: firing.related_task_id,
            };
            state.storage.insert_alert(record).await?;
            tracing::info!(
                rule = %rule.name,
                condition = %rule.condition_type,
                agent = ?firing.related_agent_id,
                "Alert fired"
            );
        }
    }
    Ok(())
}

// ============================================================================
// CONDITION EVALUATORS
// ============================================================================

fn config_str(config: &Map<String, JsonValue>, key: &str) -> Option<String> {
    config.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn config_i64(config: &Map<String, JsonValue>, key: &str, default: i64) -> i64 {
    config.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
}

fn config_f64(config: &Map<String, JsonValue>, key: &str, default: f64) -> f64 {
    config.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

/// Any listed agent (or any agent at all) derives to stuck.
async fn check_agent_stuck(
    state: &AppState,
    tenant_id: &str,
    config: &Map<String, JsonValue>,
    now: DateTime<Utc>,
) -> ApiResult<Firing> {
    let threshold = config_i64(config, "stuck_threshold_seconds", 300);
    let agents = match config_str(config, "agent_id") {
        Some(agent_id) => state
            .storage
            .get_agent(tenant_id, &agent_id)
            .await?
            .into_iter()
            .collect(),
        None => state.storage.list_agents(tenant_id, AgentQuery::new()).await?,
    };

    for agent in agents {
        if derive_agent_status(&agent, now) == AgentStatus::Stuck {
            let heartbeat_age = agent.last_heartbeat.map(|hb| (now - hb).num_seconds());
            return Ok(Firing::hit(json!({
                "agent_id": agent.agent_id,
                "threshold_seconds": threshold,
                "heartbeat_age_seconds": heartbeat_age,
            }))
            .agent(agent.agent_id.clone()));
        }
    }
    Ok(Firing::none())
}

/// The new batch contains a task_failed event.
fn check_task_failed(new_events: &[Event]) -> Firing {
    for event in new_events {
        if event.event_type == EventType::TaskFailed {
            return Firing::hit(json!({
                "event_id": event.event_id,
                "task_id": event.task_id,
                "agent_id": event.agent_id,
            }))
            .agent(event.agent_id.clone())
            .task(event.task_id.as_deref());
        }
    }
    Firing::none()
}

/// Fraction of action_failed among all action events over the window
/// reaches the threshold.
async fn check_error_rate(
    state: &AppState,
    tenant_id: &str,
    config: &Map<String, JsonValue>,
    now: DateTime<Utc>,
) -> ApiResult<Firing> {
    let threshold_pct = config_f64(config, "threshold_percent", 50.0);
    let window_minutes = config_i64(config, "window_minutes", 60);

    let page = state
        .storage
        .get_events(
            tenant_id,
            EventQuery {
                event_types: Some(vec![
                    EventType::ActionStarted,
                    EventType::ActionCompleted,
                    EventType::ActionFailed,
                ]),
                since: Some(now - Duration::minutes(window_minutes)),
                limit: 200,
                ..EventQuery::new()
            },
        )
        .await?;

    let total = page.data.len();
    if total == 0 {
        return Ok(Firing::none());
    }
    let failed = page
        .data
        .iter()
        .filter(|e| e.event_type == EventType::ActionFailed)
        .count();
    let rate = failed as f64 / total as f64 * 100.0;
    if rate >= threshold_pct {
        return Ok(Firing::hit(json!({
            "error_rate_percent": (rate * 10.0).round() / 10.0,
            "threshold_percent": threshold_pct,
            "total_actions": total,
            "failed_actions": failed,
            "window_minutes": window_minutes,
        })));
    }
    Ok(Firing::none())
}

/// The new batch contains a task_completed over the duration threshold.
fn check_duration_exceeded(new_events: &[Event], config: &Map<String, JsonValue>) -> Firing {
    let threshold_ms = config_i64(config, "threshold_ms", 60_000);
    for event in new_events {
        if event.event_type == EventType::TaskCompleted {
            if let Some(duration) = event.duration_ms {
                if duration > threshold_ms {
                    return Firing::hit(json!({
                        "task_id": event.task_id,
                        "duration_ms": duration,
                        "threshold_ms": threshold_ms,
                    }))
                    .task(event.task_id.as_deref());
                }
            }
        }
    }
    Firing::none()
}

/// The configured agent has no heartbeat, or its last heartbeat is older
/// than the window.
async fn check_heartbeat_lost(
    state: &AppState,
    tenant_id: &str,
    config: &Map<String, JsonValue>,
    now: DateTime<Utc>,
) -> ApiResult<Firing> {
    let window_seconds = config_i64(config, "window_seconds", 300);
    let Some(agent_id) = config_str(config, "agent_id") else {
        return Ok(Firing::none());
    };
    let Some(agent) = state.storage.get_agent(tenant_id, &agent_id).await? else {
        return Ok(Firing::none());
    };

    match agent.last_heartbeat {
        None => Ok(Firing::hit(json!({
            "agent_id": agent_id,
            "window_seconds": window_seconds,
            "last_heartbeat": JsonValue::Null,
        }))
        .agent(agent_id)),
        Some(heartbeat) => {
            let age = (now - heartbeat).num_seconds();
            if age > window_seconds {
                Ok(Firing::hit(json!({
                    "agent_id": agent_id,
                    "window_seconds": window_seconds,
                    "heartbeat_age_seconds": age,
                }))
                .agent(agent_id))
            } else {
                Ok(Firing::none())
            }
        }
    }
}

/// Sum of llm_call cost over the window reaches the USD threshold.
async fn check_cost_threshold(
    state: &AppState,
    tenant_id: &str,
    config: &Map<String, JsonValue>,
    now: DateTime<Utc>,
) -> ApiResult<Firing> {
    let threshold_usd = config_f64(config, "threshold_usd", 10.0);
    let window_hours = config_i64(config, "window_hours", 24);
    let range = match window_hours {
        h if h <= 1 => "1h",
        h if h <= 6 => "6h",
        h if h <= 24 => "24h",
        h if h <= 168 => "7d",
        _ => "30d",
    };

    let summary = state
        .storage
        .cost_summary(
            tenant_id,
            CostQuery {
                agent_id: config_str(config, "agent_id"),
                project_id: config_str(config, "project_id"),
                range: range.to_string(),
                interval: None,
            },
            now,
        )
        .await?;

    if summary.total_cost >= threshold_usd {
        return Ok(Firing::hit(json!({
            "total_cost_usd": (summary.total_cost * 1e4).round() / 1e4,
            "threshold_usd": threshold_usd,
            "window_hours": window_hours,
            "call_count": summary.call_count,
        })));
    }
    Ok(Firing::none())
}

// ============================================================================
// ACTION DISPATCH
// ============================================================================

/// Execute alert actions. Webhook and email are logged, not sent; the
/// returned records reflect that with `status = "logged"`.
fn dispatch_actions(actions: &[JsonValue], snapshot: &Map<String, JsonValue>) -> Vec<JsonValue> {
    let mut taken = Vec::new();
    for action in actions {
        match action.get("type").and_then(|t| t.as_str()) {
            Some("webhook") => {
                let url = action.get("url").and_then(|u| u.as_str()).unwrap_or("");
                tracing::info!(url, snapshot = ?snapshot, "Alert webhook (logged)");
                taken.push(json!({"type": "webhook", "url": url, "status": "logged"}));
            }
            Some("email") => {
                let to = action.get("to").and_then(|t| t.as_str()).unwrap_or("");
                tracing::info!(to, snapshot = ?snapshot, "Alert email (logged)");
                taken.push(json!({"type": "email", "to": to, "status": "logged"}));
            }
            _ => {}
        }
    }
    taken
}

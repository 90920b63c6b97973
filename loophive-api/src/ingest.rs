//! The critical write path - the 10-step ingestion pipeline behind
//! `POST /v1/ingest`.
//!
//! Steps 1 (auth) and part of 1 (rate limit) run in middleware; this
//! handler performs batch validation, per-event validation, enrichment,
//! canonicalization, persistence, the agent cache upsert, junction
//! materialization, fan-out, and alert evaluation - strictly in order.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use loophive_core::{
    derive_agent_status, to_iso, AgentStatus, AgentUpsert, Event, EventType, IngestError,
    IngestRequest, IngestResponse, IngestWarning, PayloadKind, ProjectCreate, Severity,
    MAX_AGENT_ID_CHARS, MAX_BATCH_EVENTS, MAX_ENVIRONMENT_CHARS, MAX_GROUP_CHARS,
    MAX_PAYLOAD_BYTES, MAX_PROJECTS_PER_TENANT, MAX_TASK_ID_CHARS,
};

use crate::alerting::evaluate_alerts;
use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::state::AppState;

pub async fn ingest(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<IngestRequest>,
) -> ApiResult<Response> {
    let tenant_id = auth.tenant_id.clone();

    // Step 2: batch-level validation. An empty batch is accepted (0/0).
    if body.events.len() > MAX_BATCH_EVENTS {
        return Err(ApiError::new(
            ErrorCode::BatchTooLarge,
            format!("Batch exceeds max {MAX_BATCH_EVENTS} events"),
        ));
    }

    let now = Utc::now();
    let now_iso = to_iso(now);

    let mut errors: Vec<IngestError> = Vec::new();
    let mut warnings: Vec<IngestWarning> = Vec::new();
    let mut accepted: Vec<Event> = Vec::new();

    // Batch-level agent metadata tracking.
    let mut has_heartbeat = false;
    let mut last_task_id: Option<String> = None;
    let mut last_project_id: Option<String> = None;
    let mut project_ids_seen: BTreeSet<String> = BTreeSet::new();

    for raw in body.events {
        // Step 3: per-event validation.
        if raw.event_id.is_empty() {
            errors.push(IngestError {
                event_id: None,
                error: "missing_field".into(),
                message: "event_id is required".into(),
            });
            continue;
        }
        if raw.timestamp.is_empty() {
            errors.push(IngestError {
                event_id: Some(raw.event_id),
                error: "missing_field".into(),
                message: "timestamp is required".into(),
            });
            continue;
        }
        if raw.event_type.is_empty() {
            errors.push(IngestError {
                event_id: Some(raw.event_id),
                error: "missing_field".into(),
                message: "event_type is required".into(),
            });
            continue;
        }
        let Ok(event_type) = raw.event_type.parse::<EventType>() else {
            errors.push(IngestError {
                event_id: Some(raw.event_id),
                error: "invalid_event_type".into(),
                message: format!("Unknown event_type: {}", raw.event_type),
            });
            continue;
        };

        // Field size limits.
        let agent_id = raw
            .agent_id
            .clone()
            .unwrap_or_else(|| body.envelope.agent_id.clone());
        if agent_id.chars().count() > MAX_AGENT_ID_CHARS {
            errors.push(IngestError {
                event_id: Some(raw.event_id),
                error: "field_too_long".into(),
                message: format!("agent_id exceeds {MAX_AGENT_ID_CHARS} chars"),
            });
            continue;
        }
        if let Some(task_id) = &raw.task_id {
            if task_id.chars().count() > MAX_TASK_ID_CHARS {
                errors.push(IngestError {
                    event_id: Some(raw.event_id),
                    error: "field_too_long".into(),
                    message: format!("task_id exceeds {MAX_TASK_ID_CHARS} chars"),
                });
                continue;
            }
        }
        if let Some(payload) = &raw.payload {
            let payload_size = serde_json::to_vec(payload).map(|b| b.len()).unwrap_or(0);
            if payload_size > MAX_PAYLOAD_BYTES {
                errors.push(IngestError {
                    event_id: Some(raw.event_id),
                    error: "payload_too_large".into(),
                    message: format!("payload exceeds {MAX_PAYLOAD_BYTES} bytes"),
                });
                continue;
            }
        }

        // Advisory payload convention checks: warn, never reject.
        if let Some(kind) = raw.payload.as_ref().and_then(|p| p.well_known_kind()) {
            let data = raw.payload.as_ref().and_then(|p| p.data.as_ref());
            for field in kind.recommended_fields() {
                let present = data
                    .and_then(|d| d.as_object())
                    .is_some_and(|d| d.contains_key(*field));
                if !present {
                    warnings.push(IngestWarning {
                        event_id: Some(raw.event_id.clone()),
                        warning: format!("payload.kind={kind} recommends data.{field}"),
                        project_slug: None,
                    });
                }
            }
        }

        // Step 4: enrichment. Envelope denormalization with caps.
        let mut environment = body.envelope.environment.clone();
        if environment.chars().count() > MAX_ENVIRONMENT_CHARS {
            warnings.push(IngestWarning {
                event_id: Some(raw.event_id.clone()),
                warning: format!(
                    "environment truncated from {} to {} chars",
                    environment.chars().count(),
                    MAX_ENVIRONMENT_CHARS
                ),
                project_slug: None,
            });
            environment = environment.chars().take(MAX_ENVIRONMENT_CHARS).collect();
        }
        let mut group = body.envelope.group.clone();
        if group.chars().count() > MAX_GROUP_CHARS {
            warnings.push(IngestWarning {
                event_id: Some(raw.event_id.clone()),
                warning: format!(
                    "group truncated from {} to {} chars",
                    group.chars().count(),
                    MAX_GROUP_CHARS
                ),
                project_slug: None,
            });
            group = group.chars().take(MAX_GROUP_CHARS).collect();
        }

        // Severity: keep valid values, warn on unknown, then auto-default
        // from the event type with payload-kind overrides.
        let mut severity: Option<Severity> = None;
        if let Some(raw_severity) = &raw.severity {
            match raw_severity.parse::<Severity>() {
                Ok(parsed) => severity = Some(parsed),
                Err(_) => warnings.push(IngestWarning {
                    event_id: Some(raw.event_id.clone()),
                    warning: format!("Unknown severity '{raw_severity}', defaulting to auto"),
                    project_slug: None,
                }),
            }
        }
        let severity = severity.unwrap_or_else(|| {
            raw.payload
                .as_ref()
                .and_then(|p| p.well_known_kind())
                .and_then(|k| k.severity_override())
                .unwrap_or_else(|| event_type.default_severity())
        });

        // Project resolution: lookup by id then slug; auto-create below
        // quota, else route to the default project.
        let mut project_id = raw.project_id.clone();
        if let Some(requested) = raw.project_id.clone() {
            match state.storage.get_project(&tenant_id, &requested).await? {
                Some(project) => project_id = Some(project.project_id),
                None => {
                    let count = state.storage.count_projects(&tenant_id).await?;
                    if count >= MAX_PROJECTS_PER_TENANT {
                        if let Some(default) =
                            state.storage.get_project(&tenant_id, "default").await?
                        {
                            project_id = Some(default.project_id);
                        }
                        warnings.push(IngestWarning {
                            event_id: Some(raw.event_id.clone()),
                            warning: format!(
                                "Project limit ({MAX_PROJECTS_PER_TENANT}) reached; routed to default project"
                            ),
                            project_slug: Some(requested),
                        });
                    } else {
                        let created = state
                            .storage
                            .create_project(&tenant_id, ProjectCreate::auto(&requested))
                            .await?;
                        project_id = Some(created.project_id);
                        warnings.push(IngestWarning {
                            event_id: Some(raw.event_id.clone()),
                            warning: format!("Auto-created project '{requested}'"),
                            project_slug: Some(requested),
                        });
                    }
                }
            }
        }

        // LLM cost enrichment.
        let mut payload = raw.payload;
        if let Some(p) = payload.as_mut() {
            if p.is_kind(PayloadKind::LlmCall) {
                state.pricing.enrich_llm_payload(p).await;
            }
        }

        // Step 5: canonicalization into the stored shape.
        let event = Event {
            event_id: raw.event_id,
            tenant_id: tenant_id.clone(),
            agent_id,
            agent_type: raw.agent_type.or_else(|| body.envelope.agent_type.clone()),
            project_id: project_id.clone(),
            timestamp: raw.timestamp,
            received_at: now_iso.clone(),
            environment,
            group,
            task_id: raw.task_id,
            task_type: raw.task_type,
            task_run_id: raw.task_run_id,
            correlation_id: raw.correlation_id,
            action_id: raw.action_id,
            parent_action_id: raw.parent_action_id,
            event_type,
            severity,
            status: raw.status,
            duration_ms: raw.duration_ms,
            parent_event_id: raw.parent_event_id,
            payload,
            key_type: Some(auth.key_type.as_str().to_string()),
        };

        if event.event_type == EventType::Heartbeat {
            has_heartbeat = true;
        }
        if let Some(task_id) = &event.task_id {
            last_task_id = Some(task_id.clone());
        }
        if let Some(project_id) = project_id {
            last_project_id = Some(project_id.clone());
            project_ids_seen.insert(project_id);
        }
        accepted.push(event);
    }

    // Sort by timestamp before taking the last event type, so an
    // out-of-order batch cannot corrupt the derived status.
    accepted.sort_by_key(|e| {
        e.parsed_timestamp()
            .map(|t| t.timestamp_millis())
            .unwrap_or(i64::MIN)
    });
    let last_event_type = accepted.last().map(|e| e.event_type);

    if !accepted.is_empty() {
        // Step 6: single batched insert with silent dedup.
        state.storage.insert_events(accepted.clone()).await?;

        // Step 7: agent cache upsert, atomic per agent.
        let last_ts: DateTime<Utc> = accepted
            .iter()
            .filter_map(|e| e.parsed_timestamp())
            .max()
            .unwrap_or(now);
        let agent = state
            .storage
            .upsert_agent(
                &tenant_id,
                &body.envelope.agent_id,
                AgentUpsert {
                    agent_type: body.envelope.agent_type.clone(),
                    agent_version: body.envelope.agent_version.clone(),
                    framework: body.envelope.framework.clone(),
                    runtime: body.envelope.runtime.clone(),
                    sdk_version: body.envelope.sdk_version.clone(),
                    environment: Some(body.envelope.environment.clone()),
                    group: Some(body.envelope.group.clone()),
                    last_seen: last_ts,
                    last_heartbeat: has_heartbeat.then_some(last_ts),
                    last_event_type,
                    last_task_id,
                    last_project_id,
                    stuck_threshold_seconds: None,
                },
                now,
            )
            .await?;

        // Step 8: project-agent junction materialization.
        for project_id in &project_ids_seen {
            state
                .storage
                .upsert_project_agent(&tenant_id, project_id, &body.envelope.agent_id)
                .await?;
        }

        // Step 9: fan-out. Runs after the cache update so subscribers see
        // a consistent previous_status.
        state.ws.broadcast_events(&tenant_id, &accepted);

        let new_status = derive_agent_status(&agent, now);
        if let Some(previous) = agent.previous_status {
            if previous != new_status {
                let heartbeat_age = agent
                    .last_heartbeat
                    .map(|hb| (now - hb).num_seconds());
                state.ws.broadcast_agent_status_change(
                    &tenant_id,
                    &agent.agent_id,
                    previous.as_str(),
                    new_status.as_str(),
                    agent.last_task_id.as_deref(),
                    agent.last_project_id.as_deref(),
                    heartbeat_age,
                );
            }
        }
        if new_status == AgentStatus::Stuck {
            state.ws.broadcast_agent_stuck(
                &tenant_id,
                &agent.agent_id,
                agent.last_heartbeat.map(to_iso).as_deref(),
                agent.stuck_threshold_seconds,
                agent.last_task_id.as_deref(),
                agent.last_project_id.as_deref(),
            );
        } else {
            state.ws.clear_stuck(&tenant_id, &agent.agent_id);
        }

        // Step 10: alert evaluation.
        if let Err(error) = evaluate_alerts(&state, &tenant_id, &accepted, now).await {
            tracing::warn!(error = %error, "Alert evaluation failed");
        }
    }

    let response = IngestResponse {
        accepted: accepted.len(),
        rejected: errors.len(),
        errors,
        warnings,
    };
    let status = if response.rejected == 0 {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(response)).into_response())
}

//! Storage query behavior: dedup, filtered event reads, task grouping,
//! pipeline derivation, cost aggregation, and the agent cache upsert.

use chrono::{Duration, Utc};
use serde_json::json;

use loophive_core::{
    AgentStatus, AgentUpsert, EventType, TaskStatus, TenantPlan, derive_agent_status,
};
use loophive_storage::{
    AgentQuery, CostCallsQuery, CostQuery, EventQuery, StorageBackend, TaskQuery, TaskSort,
};
use loophive_test_utils::{llm_call_event, EventBuilder, StorageFixture};

#[tokio::test]
async fn insert_events_dedupes_on_tenant_and_event_id() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    let e1 = EventBuilder::new("e1", "t1", EventType::TaskStarted, now).build();
    let inserted = storage.insert_events(vec![e1.clone()]).await.unwrap();
    assert_eq!(inserted, 1);

    // Identical second insert is silently deduplicated.
    let inserted = storage
        .insert_events(vec![
            e1,
            EventBuilder::new("e2", "t1", EventType::Heartbeat, now).build(),
        ])
        .await
        .unwrap();
    assert_eq!(inserted, 1);
}

#[tokio::test]
async fn get_events_excludes_heartbeats_by_default() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    storage
        .insert_events(vec![
            EventBuilder::new("hb", "t1", EventType::Heartbeat, now).build(),
            EventBuilder::new("ts", "t1", EventType::TaskStarted, now).build(),
        ])
        .await
        .unwrap();

    let page = storage.get_events("t1", EventQuery::new()).await.unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].event_id, "ts");

    let mut with_heartbeats = EventQuery::new();
    with_heartbeats.exclude_heartbeats = false;
    let page = storage.get_events("t1", with_heartbeats).await.unwrap();
    assert_eq!(page.data.len(), 2);
}

#[tokio::test]
async fn get_events_is_reverse_chronological_with_cursor() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    let events = (0..5)
        .map(|i| {
            EventBuilder::new(
                &format!("e{i}"),
                "t1",
                EventType::TaskStarted,
                now - Duration::minutes(i),
            )
            .build()
        })
        .collect();
    storage.insert_events(events).await.unwrap();

    let mut query = EventQuery::new();
    query.limit = 2;
    let first = storage.get_events("t1", query.clone()).await.unwrap();
    assert_eq!(
        first.data.iter().map(|e| e.event_id.as_str()).collect::<Vec<_>>(),
        vec!["e0", "e1"]
    );
    assert!(first.pagination.has_more);

    query.cursor = first.pagination.cursor.clone();
    let second = storage.get_events("t1", query).await.unwrap();
    assert_eq!(
        second.data.iter().map(|e| e.event_id.as_str()).collect::<Vec<_>>(),
        vec!["e2", "e3"]
    );
}

#[tokio::test]
async fn round_trip_preserves_identity_and_payload() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    let original = EventBuilder::new("rt", "t1", EventType::Custom, now)
        .payload_json(json!({
            "kind": "llm_call",
            "summary": "LLM call",
            "data": {"name": "reason", "model": "gpt-4o", "tokens_in": 10}
        }))
        .build();
    storage.insert_events(vec![original.clone()]).await.unwrap();

    let page = storage.get_events("t1", EventQuery::new()).await.unwrap();
    let stored = &page.data[0];
    assert_eq!(stored.event_id, original.event_id);
    assert_eq!(stored.event_type, original.event_type);
    assert_eq!(stored.timestamp, original.timestamp);
    assert_eq!(stored.payload, original.payload);
}

#[tokio::test]
async fn tasks_are_grouped_and_derived() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    storage
        .insert_events(vec![
            EventBuilder::new("s1", "t1", EventType::TaskStarted, now - Duration::minutes(10))
                .task("task-a")
                .build(),
            EventBuilder::new("c1", "t1", EventType::TaskCompleted, now - Duration::minutes(9))
                .task("task-a")
                .duration(60_000)
                .build(),
            EventBuilder::new("s2", "t1", EventType::TaskStarted, now - Duration::minutes(5))
                .task("task-b")
                .build(),
            EventBuilder::new("f2", "t1", EventType::TaskFailed, now - Duration::minutes(4))
                .task("task-b")
                .build(),
        ])
        .await
        .unwrap();

    let page = storage.list_tasks("t1", TaskQuery::new()).await.unwrap();
    assert_eq!(page.data.len(), 2);
    // newest first
    assert_eq!(page.data[0].task_id, "task-b");
    assert_eq!(page.data[0].derived_status, TaskStatus::Failed);
    assert_eq!(page.data[1].task_id, "task-a");
    assert_eq!(page.data[1].derived_status, TaskStatus::Completed);
    assert_eq!(page.data[1].duration_ms, Some(60_000));

    let mut by_status = TaskQuery::new();
    by_status.status = Some(TaskStatus::Failed);
    let failed = storage.list_tasks("t1", by_status).await.unwrap();
    assert_eq!(failed.data.len(), 1);
    assert_eq!(failed.data[0].task_id, "task-b");
}

#[tokio::test]
async fn task_cost_and_tokens_sum_from_llm_calls() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    let mut call1 = llm_call_event("l1", "t1", now, "gpt-4o", 100, 50, Some(0.25));
    call1.task_id = Some("task-a".into());
    let mut call2 = llm_call_event("l2", "t1", now, "gpt-4o", 200, 100, Some(0.75));
    call2.task_id = Some("task-a".into());

    storage
        .insert_events(vec![
            EventBuilder::new("s1", "t1", EventType::TaskStarted, now)
                .task("task-a")
                .build(),
            call1,
            call2,
        ])
        .await
        .unwrap();

    let mut by_cost = TaskQuery::new();
    by_cost.sort = TaskSort::Cost;
    let page = storage.list_tasks("t1", by_cost).await.unwrap();
    let task = &page.data[0];
    assert_eq!(task.llm_call_count, 2);
    assert_eq!(task.total_tokens_in, 300);
    assert_eq!(task.total_tokens_out, 150);
    assert!((task.total_cost.unwrap() - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn pipeline_derives_queue_todos_and_issues() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    storage
        .insert_events(vec![
            EventBuilder::new("q1", "t1", EventType::Custom, now - Duration::minutes(10))
                .payload_json(json!({"kind": "queue_snapshot", "data": {"depth": 3}}))
                .build(),
            EventBuilder::new("q2", "t1", EventType::Custom, now - Duration::minutes(1))
                .payload_json(json!({"kind": "queue_snapshot", "data": {"depth": 7}}))
                .build(),
            EventBuilder::new("td1", "t1", EventType::Custom, now - Duration::minutes(8))
                .payload_json(json!({"kind": "todo", "data": {"todo_id": "td-a", "action": "created"}}))
                .build(),
            EventBuilder::new("td2", "t1", EventType::Custom, now - Duration::minutes(7))
                .payload_json(json!({"kind": "todo", "data": {"todo_id": "td-b", "action": "created"}}))
                .build(),
            EventBuilder::new("td3", "t1", EventType::Custom, now - Duration::minutes(6))
                .payload_json(json!({"kind": "todo", "data": {"todo_id": "td-b", "action": "completed"}}))
                .build(),
            EventBuilder::new("is1", "t1", EventType::Custom, now - Duration::minutes(5))
                .payload_json(json!({
                    "kind": "issue", "summary": "API quota low",
                    "data": {"severity": "high", "issue_id": "iss-1"}
                }))
                .build(),
            EventBuilder::new("is2", "t1", EventType::Custom, now - Duration::minutes(4))
                .payload_json(json!({
                    "kind": "issue", "summary": "API quota low",
                    "data": {"severity": "low", "issue_id": "iss-1", "action": "resolved"}
                }))
                .build(),
            EventBuilder::new("sc1", "t1", EventType::Custom, now - Duration::minutes(3))
                .payload_json(json!({
                    "kind": "scheduled",
                    "data": {"items": [{"id": "job-1", "name": "daily sync"}]}
                }))
                .build(),
        ])
        .await
        .unwrap();

    let pipeline = storage.get_pipeline("t1", "a1").await.unwrap();

    // Latest snapshot wins, with snapshot_at attached.
    let queue = pipeline.queue.as_ref().unwrap();
    assert_eq!(queue["depth"], 7);
    assert!(queue.get("snapshot_at").is_some());

    // td-b was completed, only td-a remains.
    assert_eq!(pipeline.todos.len(), 1);
    assert_eq!(pipeline.todos[0]["todo_id"], "td-a");

    // iss-1 was resolved.
    assert!(pipeline.issues.is_empty());

    assert_eq!(pipeline.scheduled.len(), 1);
    assert_eq!(pipeline.scheduled[0]["id"], "job-1");
}

#[tokio::test]
async fn cost_summary_splits_reported_and_estimated() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    let mut reported = llm_call_event("c1", "t1", now, "gpt-4o", 100, 50, Some(0.5));
    if let Some(p) = reported.payload.as_mut() {
        p.data.as_mut().unwrap()["cost_source"] = json!("reported");
    }
    let mut estimated = llm_call_event("c2", "t1", now, "claude-haiku-4-5", 1000, 500, Some(0.0028));
    if let Some(p) = estimated.payload.as_mut() {
        p.data.as_mut().unwrap()["cost_source"] = json!("estimated");
    }
    storage.insert_events(vec![reported, estimated]).await.unwrap();

    let summary = storage
        .cost_summary(
            "t1",
            CostQuery {
                range: "24h".into(),
                ..Default::default()
            },
            now,
        )
        .await
        .unwrap();
    assert_eq!(summary.call_count, 2);
    assert!((summary.total_cost - 0.5028).abs() < 1e-9);
    assert!((summary.reported_cost - 0.5).abs() < 1e-9);
    assert!((summary.estimated_cost - 0.0028).abs() < 1e-9);
    assert_eq!(summary.by_model.len(), 2);
}

#[tokio::test]
async fn cost_calls_carry_cost_source() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    let mut call = llm_call_event("c1", "t1", now, "gpt-4o", 100, 50, Some(0.5));
    if let Some(p) = call.payload.as_mut() {
        p.data.as_mut().unwrap()["cost_source"] = json!("reported");
    }
    storage.insert_events(vec![call]).await.unwrap();

    let page = storage
        .cost_calls("t1", CostCallsQuery::new())
        .await
        .unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].cost_source.as_deref(), Some("reported"));
    assert_eq!(page.data[0].model, "gpt-4o");
}

#[tokio::test]
async fn agent_upsert_records_previous_status() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    // First batch: task_started => processing after upsert.
    let rec = storage
        .upsert_agent(
            "t1",
            "a1",
            AgentUpsert {
                last_seen: now,
                last_heartbeat: Some(now),
                last_event_type: Some(EventType::TaskStarted),
                ..Default::default()
            },
            now,
        )
        .await
        .unwrap();
    assert!(rec.previous_status.is_none());
    assert_eq!(derive_agent_status(&rec, now), AgentStatus::Processing);

    // Second batch: the pre-mutation status is recorded.
    let rec = storage
        .upsert_agent(
            "t1",
            "a1",
            AgentUpsert {
                last_seen: now,
                last_event_type: Some(EventType::TaskCompleted),
                ..Default::default()
            },
            now,
        )
        .await
        .unwrap();
    assert_eq!(rec.previous_status, Some(AgentStatus::Processing));
    assert_eq!(derive_agent_status(&rec, now), AgentStatus::Idle);
}

#[tokio::test]
async fn agent_metadata_coalesces() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    storage
        .upsert_agent(
            "t1",
            "a1",
            AgentUpsert {
                agent_type: Some("sales".into()),
                agent_version: Some("1.0".into()),
                last_seen: now,
                ..Default::default()
            },
            now,
        )
        .await
        .unwrap();

    // Absent metadata leaves the profile untouched.
    let rec = storage
        .upsert_agent(
            "t1",
            "a1",
            AgentUpsert {
                last_seen: now + Duration::seconds(5),
                ..Default::default()
            },
            now,
        )
        .await
        .unwrap();
    assert_eq!(rec.agent_type, "sales");
    assert_eq!(rec.agent_version.as_deref(), Some("1.0"));
    assert_eq!(rec.first_seen, rec.first_seen.min(rec.last_seen));
}

#[tokio::test]
async fn list_agents_filters_by_project_via_junction() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    for agent in ["a1", "a2"] {
        storage
            .upsert_agent(
                "t1",
                agent,
                AgentUpsert {
                    last_seen: now,
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();
    }
    storage.upsert_project_agent("t1", "p1", "a1").await.unwrap();

    let mut query = AgentQuery::new();
    query.project_id = Some("p1".into());
    let agents = storage.list_agents("t1", query).await.unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].agent_id, "a1");
}

#[tokio::test]
async fn project_slug_lookup_and_uniqueness() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;

    // Default project exists from tenant creation.
    let default = storage.get_project("t1", "default").await.unwrap().unwrap();
    assert_eq!(default.slug, "default");
    assert!(!default.auto_created);

    // Lookup by generated id also works.
    let by_id = storage
        .get_project("t1", &default.project_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_id.project_id, default.project_id);

    // Duplicate slug is a conflict.
    let dup = storage
        .create_project("t1", loophive_core::ProjectCreate::auto("default"))
        .await;
    assert!(dup.is_err());
}

#[tokio::test]
async fn reassign_events_moves_project_events() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    storage
        .insert_events(vec![
            EventBuilder::new("e1", "t1", EventType::TaskStarted, now)
                .project("p-src")
                .build(),
            EventBuilder::new("e2", "t1", EventType::TaskStarted, now)
                .project("p-other")
                .build(),
        ])
        .await
        .unwrap();

    let moved = storage.reassign_events("t1", "p-src", "p-dst").await.unwrap();
    assert_eq!(moved, 1);
    assert_eq!(storage.count_project_events("t1", "p-dst").await.unwrap(), 1);
    assert_eq!(storage.count_project_events("t1", "p-src").await.unwrap(), 0);
}

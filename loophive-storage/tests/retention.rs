//! Retention and pruning behavior: plan-based TTL, cold-event retention,
//! and the unified single-pass counts.

use chrono::{Duration, Utc};
use loophive_core::{EventType, TenantPlan};
use loophive_storage::StorageBackend;
use loophive_test_utils::{EventBuilder, StorageFixture};

#[tokio::test]
async fn prunes_events_older_than_free_retention() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    storage
        .insert_events(vec![
            EventBuilder::new("old1", "t1", EventType::TaskCompleted, now - Duration::days(8))
                .build(),
            EventBuilder::new("new1", "t1", EventType::TaskCompleted, now - Duration::hours(1))
                .build(),
        ])
        .await
        .unwrap();

    let stats = storage.prune_events(now).await.unwrap();
    assert_eq!(stats.ttl_pruned, 1);
    assert_eq!(stats.cold_pruned, 0);
    assert_eq!(stats.total_pruned, 1);

    let remaining = storage.get_task_events("t1", "none").await.unwrap();
    assert!(remaining.is_empty());
    let events = storage
        .get_events("t1", loophive_storage::EventQuery::new())
        .await
        .unwrap();
    assert_eq!(events.data.len(), 1);
    assert_eq!(events.data[0].event_id, "new1");
}

#[tokio::test]
async fn pro_plan_keeps_events_free_would_drop() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Pro).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    storage
        .insert_events(vec![
            EventBuilder::new("old", "t1", EventType::TaskCompleted, now - Duration::days(31))
                .build(),
            EventBuilder::new("mid", "t1", EventType::TaskCompleted, now - Duration::days(15))
                .build(),
        ])
        .await
        .unwrap();

    let stats = storage.prune_events(now).await.unwrap();
    assert_eq!(stats.ttl_pruned, 1);
    let page = storage
        .get_events("t1", loophive_storage::EventQuery::new())
        .await
        .unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].event_id, "mid");
}

#[tokio::test]
async fn unknown_tenant_and_unparseable_timestamp_are_kept() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    let mut orphan =
        EventBuilder::new("orphan", "ghost", EventType::TaskCompleted, now - Duration::days(365))
            .build();
    orphan.tenant_id = "ghost".to_string();
    let mut corrupt =
        EventBuilder::new("bad_ts", "t1", EventType::TaskCompleted, now).build();
    corrupt.timestamp = "not-a-date".to_string();

    storage.insert_events(vec![orphan, corrupt]).await.unwrap();

    let stats = storage.prune_events(now).await.unwrap();
    assert_eq!(stats.total_pruned, 0);
}

#[tokio::test]
async fn cold_prunes_stale_heartbeats_inside_ttl() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    storage
        .insert_events(vec![
            // 20 minutes old: past the 600 s heartbeat horizon, inside TTL.
            EventBuilder::new("hb_old", "t1", EventType::Heartbeat, now - Duration::minutes(20))
                .build(),
            // 5 minutes old: inside the horizon.
            EventBuilder::new("hb_new", "t1", EventType::Heartbeat, now - Duration::minutes(5))
                .build(),
        ])
        .await
        .unwrap();

    let stats = storage.prune_events(now).await.unwrap();
    assert_eq!(stats.ttl_pruned, 0);
    assert_eq!(stats.cold_pruned, 1);

    let mut query = loophive_storage::EventQuery::new();
    query.exclude_heartbeats = false;
    let page = storage.get_events("t1", query).await.unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].event_id, "hb_new");
}

#[tokio::test]
async fn cold_prunes_day_old_action_started_only() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Pro).await;
    let storage = &fixture.storage;
    let now = Utc::now();
    let two_days = now - Duration::days(2);

    storage
        .insert_events(vec![
            EventBuilder::new("as_old", "t1", EventType::ActionStarted, two_days).build(),
            EventBuilder::new("ac_old", "t1", EventType::ActionCompleted, two_days).build(),
            EventBuilder::new("af_old", "t1", EventType::ActionFailed, two_days).build(),
            EventBuilder::new(
                "as_new",
                "t1",
                EventType::ActionStarted,
                now - Duration::hours(1),
            )
            .build(),
        ])
        .await
        .unwrap();

    let stats = storage.prune_events(now).await.unwrap();
    assert_eq!(stats.cold_pruned, 1);
    let page = storage
        .get_events("t1", loophive_storage::EventQuery::new())
        .await
        .unwrap();
    let ids: Vec<&str> = page.data.iter().map(|e| e.event_id.as_str()).collect();
    assert!(!ids.contains(&"as_old"));
    assert!(ids.contains(&"ac_old"));
    assert!(ids.contains(&"af_old"));
    assert!(ids.contains(&"as_new"));
}

#[tokio::test]
async fn ttl_dominates_cold_and_counts_once() {
    // A heartbeat past TTL is counted as ttl_pruned, never double-counted.
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    storage
        .insert_events(vec![EventBuilder::new(
            "hb_ancient",
            "t1",
            EventType::Heartbeat,
            now - Duration::days(8),
        )
        .build()])
        .await
        .unwrap();

    let stats = storage.prune_events(now).await.unwrap();
    assert_eq!(stats.ttl_pruned, 1);
    assert_eq!(stats.cold_pruned, 0);
    assert_eq!(stats.total_pruned, 1);
}

#[tokio::test]
async fn combined_pass_matches_spec_scenario() {
    // Free plan: one event 8 days old, one 1 hour old, one heartbeat
    // 20 minutes old. Result: {ttl:1, cold:1, total:2}.
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let storage = &fixture.storage;
    let now = Utc::now();

    storage
        .insert_events(vec![
            EventBuilder::new("e_old", "t1", EventType::TaskCompleted, now - Duration::days(8))
                .build(),
            EventBuilder::new("e_new", "t1", EventType::TaskCompleted, now - Duration::hours(1))
                .build(),
            EventBuilder::new("hb", "t1", EventType::Heartbeat, now - Duration::minutes(20))
                .build(),
        ])
        .await
        .unwrap();

    let stats = storage.prune_events(now).await.unwrap();
    assert_eq!(stats.ttl_pruned, 1);
    assert_eq!(stats.cold_pruned, 1);
    assert_eq!(stats.total_pruned, 2);

    let mut query = loophive_storage::EventQuery::new();
    query.exclude_heartbeats = false;
    let page = storage.get_events("t1", query).await.unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].event_id, "e_new");
}

#[tokio::test]
async fn empty_pass_reports_zero() {
    let fixture = StorageFixture::with_tenant("t1", TenantPlan::Free).await;
    let stats = fixture.storage.prune_events(Utc::now()).await.unwrap();
    assert_eq!(stats.total_pruned, 0);
}

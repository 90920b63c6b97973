//! WebSocket streaming - real-time event and agent status fan-out.
//!
//! Endpoint: `GET /v1/stream?token={api_key}`, upgraded to a WebSocket.
//! Clients subscribe to the `events` and/or `agents` channels with a
//! filter map; the ingestion pipeline pushes matching events and agent
//! status transitions through the manager.
//!
//! The connection registry is copy-on-iterate: broadcasts snapshot the
//! per-tenant list so concurrent register/disconnect never deadlocks an
//! iteration.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc;
use uuid::Uuid;

use loophive_core::{to_iso, Event, Severity, MAX_WEBSOCKET_CONNECTIONS};

use crate::auth::hash_key;
use crate::state::AppState;

/// Close codes used by the stream endpoint.
const CLOSE_INVALID_TOKEN: u16 = 4001;
const CLOSE_TOO_MANY_CONNECTIONS: u16 = 4002;
const CLOSE_PING_TIMEOUT: u16 = 4003;

/// Missed server pings before a connection is closed.
const MAX_MISSED_PONGS: u32 = 3;

// ============================================================================
// SUBSCRIPTION
// ============================================================================

/// Per-connection subscription state: a channel set and a filter map.
#[derive(Debug, Default, Clone)]
pub struct Subscription {
    pub channels: HashSet<String>,
    pub project_id: Option<String>,
    pub environment: Option<String>,
    pub group: Option<String>,
    pub agent_id: Option<String>,
    pub event_types: Option<HashSet<String>>,
    pub min_severity: Option<Severity>,
}

impl Subscription {
    /// Apply a raw filter map from a subscribe message.
    pub fn set_filters(&mut self, filters: &JsonValue) {
        let get_str =
            |key: &str| filters.get(key).and_then(|v| v.as_str()).map(str::to_string);
        self.project_id = get_str("project_id");
        self.environment = get_str("environment");
        self.group = get_str("group");
        self.agent_id = get_str("agent_id");
        self.event_types = filters.get("event_types").and_then(|v| v.as_array()).map(|a| {
            a.iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect()
        });
        self.min_severity = filters
            .get("min_severity")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok());
    }

    /// The filter map as last subscribed, echoed back to the client.
    pub fn filters_json(&self) -> JsonValue {
        let mut filters = serde_json::Map::new();
        if let Some(v) = &self.project_id {
            filters.insert("project_id".into(), json!(v));
        }
        if let Some(v) = &self.environment {
            filters.insert("environment".into(), json!(v));
        }
        if let Some(v) = &self.group {
            filters.insert("group".into(), json!(v));
        }
        if let Some(v) = &self.agent_id {
            filters.insert("agent_id".into(), json!(v));
        }
        if let Some(v) = &self.event_types {
            filters.insert("event_types".into(), json!(v.iter().collect::<Vec<_>>()));
        }
        if let Some(v) = self.min_severity {
            filters.insert("min_severity".into(), json!(v.as_str()));
        }
        JsonValue::Object(filters)
    }

    /// Whether an event passes every configured filter on the `events`
    /// channel.
    pub fn matches_event(&self, event: &Event) -> bool {
        if !self.channels.contains("events") {
            return false;
        }
        if let Some(project_id) = &self.project_id {
            if event.project_id.as_deref() != Some(project_id.as_str()) {
                return false;
            }
        }
        if let Some(environment) = &self.environment {
            if &event.environment != environment {
                return false;
            }
        }
        if let Some(group) = &self.group {
            if &event.group != group {
                return false;
            }
        }
        if let Some(agent_id) = &self.agent_id {
            if &event.agent_id != agent_id {
                return false;
            }
        }
        if let Some(types) = &self.event_types {
            if !types.contains(event.event_type.as_str()) {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if event.severity < min {
                return false;
            }
        }
        true
    }

    pub fn wants_agents(&self) -> bool {
        self.channels.contains("agents")
    }
}

// ============================================================================
// CONNECTIONS
// ============================================================================

/// One live WebSocket connection. Outbound messages go through an
/// unbounded channel drained by the socket task.
pub struct WsConnection {
    pub conn_id: Uuid,
    pub tenant_id: String,
    pub key_id: String,
    tx: mpsc::UnboundedSender<Message>,
    subscription: Mutex<Subscription>,
    missed_pongs: AtomicU32,
}

impl WsConnection {
    fn send_json(&self, value: &JsonValue) {
        let Ok(text) = serde_json::to_string(value) else {
            return;
        };
        // A closed receiver means the socket task is gone; the registry
        // entry is cleaned up by the disconnect path.
        let _ = self.tx.send(Message::Text(text.into()));
    }
}

// ============================================================================
// MANAGER
// ============================================================================

/// Fan-out manager: per-tenant connection lists, subscription handling,
/// broadcasts, the per-agent stuck latch, and the liveness ping loop.
pub struct WsManager {
    connections: Mutex<HashMap<String, Vec<Arc<WsConnection>>>>,
    key_counts: DashMap<String, usize>,
    stuck_fired: DashMap<(String, String), ()>,
}

impl WsManager {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            key_counts: DashMap::new(),
            stuck_fired: DashMap::new(),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .expect("ws registry poisoned")
            .values()
            .map(|conns| conns.len())
            .sum()
    }

    /// Register a connection unless the per-key cap is exhausted.
    pub fn register(
        &self,
        tenant_id: &str,
        key_id: &str,
        tx: mpsc::UnboundedSender<Message>,
    ) -> Option<Arc<WsConnection>> {
        let mut count = self.key_counts.entry(key_id.to_string()).or_insert(0);
        if *count >= MAX_WEBSOCKET_CONNECTIONS {
            return None;
        }
        *count += 1;
        drop(count);

        let conn = Arc::new(WsConnection {
            conn_id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            key_id: key_id.to_string(),
            tx,
            subscription: Mutex::new(Subscription::default()),
            missed_pongs: AtomicU32::new(0),
        });
        self.connections
            .lock()
            .expect("ws registry poisoned")
            .entry(tenant_id.to_string())
            .or_default()
            .push(conn.clone());
        Some(conn)
    }

    pub fn disconnect(&self, conn: &Arc<WsConnection>) {
        let mut registry = self.connections.lock().expect("ws registry poisoned");
        if let Some(conns) = registry.get_mut(&conn.tenant_id) {
            let before = conns.len();
            conns.retain(|c| c.conn_id != conn.conn_id);
            if conns.len() < before {
                if let Some(mut count) = self.key_counts.get_mut(&conn.key_id) {
                    *count = count.saturating_sub(1);
                }
            }
            if conns.is_empty() {
                registry.remove(&conn.tenant_id);
            }
        }
    }

    fn snapshot(&self, tenant_id: &str) -> Vec<Arc<WsConnection>> {
        self.connections
            .lock()
            .expect("ws registry poisoned")
            .get(tenant_id)
            .cloned()
            .unwrap_or_default()
    }

    fn all_connections(&self) -> Vec<Arc<WsConnection>> {
        self.connections
            .lock()
            .expect("ws registry poisoned")
            .values()
            .flatten()
            .cloned()
            .collect()
    }

    // ========================================================================
    // CLIENT MESSAGES
    // ========================================================================

    /// Process a client message (subscribe / unsubscribe / ping); any
    /// inbound traffic counts as liveness.
    pub fn handle_message(&self, conn: &WsConnection, message: &JsonValue) {
        conn.missed_pongs.store(0, Ordering::Relaxed);
        const VALID_CHANNELS: [&str; 2] = ["events", "agents"];

        match message.get("action").and_then(|a| a.as_str()) {
            Some("subscribe") => {
                let mut subscription = conn.subscription.lock().expect("subscription poisoned");
                subscription.channels = message
                    .get("channels")
                    .and_then(|c| c.as_array())
                    .map(|channels| {
                        channels
                            .iter()
                            .filter_map(|c| c.as_str())
                            .filter(|c| VALID_CHANNELS.contains(c))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                subscription.set_filters(message.get("filters").unwrap_or(&JsonValue::Null));
                let reply = json!({
                    "type": "subscribed",
                    "channels": subscription.channels.iter().collect::<Vec<_>>(),
                    "filters": subscription.filters_json(),
                });
                drop(subscription);
                conn.send_json(&reply);
            }
            Some("unsubscribe") => {
                let removed: Vec<String> = message
                    .get("channels")
                    .and_then(|c| c.as_array())
                    .map(|channels| {
                        channels
                            .iter()
                            .filter_map(|c| c.as_str())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                {
                    let mut subscription =
                        conn.subscription.lock().expect("subscription poisoned");
                    for channel in &removed {
                        subscription.channels.remove(channel);
                    }
                }
                conn.send_json(&json!({"type": "unsubscribed", "channels": removed}));
            }
            Some("ping") => {
                conn.send_json(&json!({
                    "type": "pong",
                    "server_time": to_iso(chrono::Utc::now()),
                }));
            }
            _ => {}
        }
    }

    // ========================================================================
    // BROADCASTS
    // ========================================================================

    /// Push new events to matching `events`-channel subscribers.
    pub fn broadcast_events(&self, tenant_id: &str, events: &[Event]) {
        for conn in self.snapshot(tenant_id) {
            let subscription = conn.subscription.lock().expect("subscription poisoned");
            for event in events {
                if subscription.matches_event(event) {
                    conn.send_json(&json!({"type": "event.new", "data": event}));
                }
            }
        }
    }

    /// Push an agent status transition to `agents`-channel subscribers.
    #[allow(clippy::too_many_arguments)]
    pub fn broadcast_agent_status_change(
        &self,
        tenant_id: &str,
        agent_id: &str,
        previous_status: &str,
        new_status: &str,
        current_task_id: Option<&str>,
        current_project_id: Option<&str>,
        heartbeat_age_seconds: Option<i64>,
    ) {
        let message = json!({
            "type": "agent.status_changed",
            "data": {
                "agent_id": agent_id,
                "previous_status": previous_status,
                "new_status": new_status,
                "timestamp": to_iso(chrono::Utc::now()),
                "current_task_id": current_task_id,
                "current_project_id": current_project_id,
                "heartbeat_age_seconds": heartbeat_age_seconds,
            },
        });
        for conn in self.snapshot(tenant_id) {
            if conn
                .subscription
                .lock()
                .expect("subscription poisoned")
                .wants_agents()
            {
                conn.send_json(&message);
            }
        }
    }

    /// Fire `agent.stuck` at most once per contiguous stuck episode.
    pub fn broadcast_agent_stuck(
        &self,
        tenant_id: &str,
        agent_id: &str,
        last_heartbeat: Option<&str>,
        stuck_threshold_seconds: i64,
        current_task_id: Option<&str>,
        current_project_id: Option<&str>,
    ) {
        let latch_key = (tenant_id.to_string(), agent_id.to_string());
        if self.stuck_fired.contains_key(&latch_key) {
            return;
        }
        self.stuck_fired.insert(latch_key, ());

        let message = json!({
            "type": "agent.stuck",
            "data": {
                "agent_id": agent_id,
                "last_heartbeat": last_heartbeat,
                "stuck_threshold_seconds": stuck_threshold_seconds,
                "current_task_id": current_task_id,
                "current_project_id": current_project_id,
            },
        });
        for conn in self.snapshot(tenant_id) {
            if conn
                .subscription
                .lock()
                .expect("subscription poisoned")
                .wants_agents()
            {
                conn.send_json(&message);
            }
        }
    }

    /// Clear the stuck latch on transition to any non-stuck status.
    pub fn clear_stuck(&self, tenant_id: &str, agent_id: &str) {
        self.stuck_fired
            .remove(&(tenant_id.to_string(), agent_id.to_string()));
    }

    /// Whether the stuck latch is currently set (test hook).
    pub fn stuck_latched(&self, tenant_id: &str, agent_id: &str) -> bool {
        self.stuck_fired
            .contains_key(&(tenant_id.to_string(), agent_id.to_string()))
    }

    // ========================================================================
    // LIVENESS
    // ========================================================================

    /// Ping every connection; close the ones with too many missed pongs.
    pub fn ping_all(&self) {
        for conn in self.all_connections() {
            let missed = conn.missed_pongs.fetch_add(1, Ordering::Relaxed) + 1;
            if missed >= MAX_MISSED_PONGS {
                let _ = conn.tx.send(Message::Close(Some(CloseFrame {
                    code: CLOSE_PING_TIMEOUT,
                    reason: "Ping timeout".into(),
                })));
                self.disconnect(&conn);
            } else {
                conn.send_json(&json!({"type": "ping"}));
            }
        }
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// HANDLER
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    pub token: String,
}

/// `GET /v1/stream` upgrade handler. Auth happens after the upgrade so the
/// client receives a proper close code instead of an HTTP error.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<StreamParams>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.token))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, token: String) {
    let info = if token.is_empty() {
        None
    } else {
        state
            .storage
            .authenticate(&hash_key(&token))
            .await
            .ok()
            .flatten()
    };
    let Some(info) = info else {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_INVALID_TOKEN,
                reason: "Invalid API key".into(),
            })))
            .await;
        return;
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let Some(conn) = state.ws.register(&info.tenant_id, &info.key_id, tx) else {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_TOO_MANY_CONNECTIONS,
                reason: "Too many connections for this API key".into(),
            })))
            .await;
        return;
    };

    tracing::debug!(
        tenant_id = %conn.tenant_id,
        conn_id = %conn.conn_id,
        "Stream connected"
    );

    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(message) => {
                        let closing = matches!(message, Message::Close(_));
                        if sender.send(message).await.is_err() || closing {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(value) = serde_json::from_str::<JsonValue>(&text) {
                            state.ws.handle_message(&conn, &value);
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        conn.missed_pongs.store(0, Ordering::Relaxed);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        tracing::debug!(error = %error, "Stream receive error");
                        break;
                    }
                }
            }
        }
    }

    state.ws.disconnect(&conn);
    tracing::debug!(
        tenant_id = %conn.tenant_id,
        conn_id = %conn.conn_id,
        "Stream disconnected"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use loophive_core::EventType;

    fn event(agent_id: &str, severity: Severity) -> Event {
        Event {
            event_id: "e1".into(),
            tenant_id: "t1".into(),
            agent_id: agent_id.into(),
            agent_type: None,
            project_id: Some("p1".into()),
            timestamp: "2026-02-10T14:00:00Z".into(),
            received_at: "2026-02-10T14:00:00Z".into(),
            environment: "production".into(),
            group: "default".into(),
            task_id: None,
            task_type: None,
            task_run_id: None,
            correlation_id: None,
            action_id: None,
            parent_action_id: None,
            event_type: EventType::TaskStarted,
            severity,
            status: None,
            duration_ms: None,
            parent_event_id: None,
            payload: None,
            key_type: None,
        }
    }

    fn subscribed(filters: JsonValue) -> Subscription {
        let mut subscription = Subscription {
            channels: ["events".to_string()].into(),
            ..Default::default()
        };
        subscription.set_filters(&filters);
        subscription
    }

    #[test]
    fn test_agent_filter_excludes_other_agents() {
        let subscription = subscribed(json!({"agent_id": "a1"}));
        assert!(subscription.matches_event(&event("a1", Severity::Info)));
        assert!(!subscription.matches_event(&event("a2", Severity::Info)));
    }

    #[test]
    fn test_min_severity_is_at_or_above() {
        let subscription = subscribed(json!({"min_severity": "warn"}));
        assert!(!subscription.matches_event(&event("a1", Severity::Info)));
        assert!(subscription.matches_event(&event("a1", Severity::Warn)));
        assert!(subscription.matches_event(&event("a1", Severity::Error)));
    }

    #[test]
    fn test_event_types_is_membership() {
        let subscription = subscribed(json!({"event_types": ["task_started", "task_failed"]}));
        assert!(subscription.matches_event(&event("a1", Severity::Info)));
        let subscription = subscribed(json!({"event_types": ["heartbeat"]}));
        assert!(!subscription.matches_event(&event("a1", Severity::Info)));
    }

    #[test]
    fn test_events_channel_required() {
        let mut subscription = subscribed(json!({}));
        subscription.channels.clear();
        assert!(!subscription.matches_event(&event("a1", Severity::Info)));
    }

    #[test]
    fn test_register_enforces_per_key_cap() {
        let manager = WsManager::new();
        let mut held = Vec::new();
        for _ in 0..MAX_WEBSOCKET_CONNECTIONS {
            let (tx, _rx) = mpsc::unbounded_channel();
            let conn = manager.register("t1", "k1", tx).expect("under cap");
            held.push(conn);
        }
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(manager.register("t1", "k1", tx).is_none());

        // Releasing one frees a slot.
        manager.disconnect(&held.pop().unwrap());
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(manager.register("t1", "k1", tx).is_some());
    }

    #[test]
    fn test_stuck_latch_fires_once_per_episode() {
        let manager = WsManager::new();
        manager.broadcast_agent_stuck("t1", "a1", None, 300, None, None);
        assert!(manager.stuck_latched("t1", "a1"));
        // Second broadcast in the same episode is suppressed by the latch
        // (observable: latch stays set, no panic on re-entry).
        manager.broadcast_agent_stuck("t1", "a1", None, 300, None, None);
        manager.clear_stuck("t1", "a1");
        assert!(!manager.stuck_latched("t1", "a1"));
    }

    #[tokio::test]
    async fn test_broadcast_respects_subscription() {
        let manager = WsManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = manager.register("t1", "k1", tx).unwrap();
        manager.handle_message(
            &conn,
            &json!({"action": "subscribe", "channels": ["events"], "filters": {"agent_id": "a1"}}),
        );
        // Drain the subscribe ack.
        let ack = rx.recv().await.unwrap();
        assert!(matches!(ack, Message::Text(t) if t.contains("subscribed")));

        manager.broadcast_events("t1", &[event("a2", Severity::Info)]);
        manager.broadcast_events("t1", &[event("a1", Severity::Info)]);
        let delivered = rx.recv().await.unwrap();
        match delivered {
            Message::Text(text) => {
                let value: JsonValue = serde_json::from_str(&text).unwrap();
                assert_eq!(value["type"], "event.new");
                assert_eq!(value["data"]["agent_id"], "a1");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

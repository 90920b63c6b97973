//! Shared test fixtures: temp-dir storage, event builders, seeded
//! tenants and API keys.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use loophive_core::{
    to_iso, ApiKeyRecord, Event, EventType, KeyType, Payload, Severity, TenantPlan,
};
use loophive_storage::{JsonStorage, StorageBackend};

/// A JSON storage backend rooted in a temp dir that lives as long as the
/// fixture.
pub struct StorageFixture {
    pub storage: JsonStorage,
    _dir: TempDir,
}

impl StorageFixture {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let storage = JsonStorage::new(dir.path());
        storage.initialize().await.expect("initialize storage");
        Self { storage, _dir: dir }
    }

    /// Storage with a seeded tenant (and therefore a default project).
    pub async fn with_tenant(tenant_id: &str, plan: TenantPlan) -> Self {
        let fixture = Self::new().await;
        fixture
            .storage
            .create_tenant(tenant_id, "Test Tenant", tenant_id, plan)
            .await
            .expect("create tenant");
        fixture
    }
}

/// SHA-256 hex digest of a raw API key, matching the auth layer.
pub fn hash_key(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// An active API key record for a raw key string.
pub fn api_key_record(tenant_id: &str, raw_key: &str, key_type: KeyType) -> ApiKeyRecord {
    ApiKeyRecord {
        key_id: uuid::Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        key_hash: hash_key(raw_key),
        key_prefix: raw_key.chars().take(12).collect(),
        key_type,
        label: Some("test".to_string()),
        created_at: Utc::now(),
        last_used_at: None,
        revoked_at: None,
        is_active: true,
    }
}

/// Builder for stored events with sensible defaults.
#[derive(Clone)]
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    pub fn new(event_id: &str, tenant_id: &str, event_type: EventType, at: DateTime<Utc>) -> Self {
        Self {
            event: Event {
                event_id: event_id.to_string(),
                tenant_id: tenant_id.to_string(),
                agent_id: "a1".to_string(),
                agent_type: None,
                project_id: None,
                timestamp: to_iso(at),
                received_at: to_iso(at),
                environment: "production".to_string(),
                group: "default".to_string(),
                task_id: None,
                task_type: None,
                task_run_id: None,
                correlation_id: None,
                action_id: None,
                parent_action_id: None,
                event_type,
                severity: event_type.default_severity(),
                status: None,
                duration_ms: None,
                parent_event_id: None,
                payload: None,
                key_type: None,
            },
        }
    }

    pub fn agent(mut self, agent_id: &str) -> Self {
        self.event.agent_id = agent_id.to_string();
        self
    }

    pub fn project(mut self, project_id: &str) -> Self {
        self.event.project_id = Some(project_id.to_string());
        self
    }

    pub fn task(mut self, task_id: &str) -> Self {
        self.event.task_id = Some(task_id.to_string());
        self
    }

    pub fn action(mut self, action_id: &str, parent_action_id: Option<&str>) -> Self {
        self.event.action_id = Some(action_id.to_string());
        self.event.parent_action_id = parent_action_id.map(str::to_string);
        self
    }

    pub fn duration(mut self, duration_ms: i64) -> Self {
        self.event.duration_ms = Some(duration_ms);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.event.severity = severity;
        self
    }

    pub fn parent_event(mut self, parent_event_id: &str) -> Self {
        self.event.parent_event_id = Some(parent_event_id.to_string());
        self
    }

    pub fn payload_json(mut self, payload: serde_json::Value) -> Self {
        self.event.payload = Some(serde_json::from_value(payload).expect("payload shape"));
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.event.payload = Some(payload);
        self
    }

    pub fn build(self) -> Event {
        self.event
    }
}

/// An llm_call custom event with the given token counts and optional cost.
pub fn llm_call_event(
    event_id: &str,
    tenant_id: &str,
    at: DateTime<Utc>,
    model: &str,
    tokens_in: i64,
    tokens_out: i64,
    cost: Option<f64>,
) -> Event {
    let mut data = serde_json::json!({
        "name": "call",
        "model": model,
        "tokens_in": tokens_in,
        "tokens_out": tokens_out,
    });
    if let Some(cost) = cost {
        data["cost"] = serde_json::json!(cost);
    }
    EventBuilder::new(event_id, tenant_id, EventType::Custom, at)
        .payload_json(serde_json::json!({
            "kind": "llm_call",
            "summary": "LLM call",
            "data": data,
        }))
        .build()
}

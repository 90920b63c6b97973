//! JSON file storage backend - reference implementation of `StorageBackend`.
//!
//! One JSON file per table, in-memory working set, write-through
//! persistence. Each table is guarded by its own `RwLock`; mutations hold
//! the write lock across the in-memory change and the file write, reads
//! take snapshots under the read lock.
//!
//! Durability is write-temp-then-rename with file mode 0600 where the
//! platform supports it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use tokio::sync::RwLock;
use uuid::Uuid;

use loophive_core::{
    auto_interval, cold_retention_seconds, derive_agent_status, derive_task_status,
    interval_seconds, range_seconds, to_iso, AgentHourStats, AgentRecord, AgentStatus,
    AgentUpsert, AlertHistoryRecord, AlertRuleCreate, AlertRuleRecord, AlertRuleUpdate,
    ApiKeyInfo, ApiKeyRecord, CostBreakdownRow, CostSummary, CostTimeBucket, Event, EventType,
    FleetPipelineState, KeyType, LlmCallRecord, MetricsGroup, MetricsResponse, MetricsSummary,
    Page, PaginationInfo, PayloadKind, PipelineState, AgentPipelineSummary, PipelineTotals,
    ProjectAgentRecord, ProjectCreate, ProjectRecord, ProjectUpdate, TaskStatus, TaskSummary,
    TenantPlan, TenantRecord, TimeseriesBucket,
};

use crate::{
    AgentQuery, CostCallsQuery, CostQuery, EventQuery, MetricsQuery, PruneStats, StorageBackend,
    StorageError, StorageResult, TaskQuery, TaskSort,
};

// ============================================================================
// TABLE
// ============================================================================

/// One table: a named, lock-guarded row vector.
struct Table<T> {
    name: &'static str,
    rows: RwLock<Vec<T>>,
}

impl<T: Serialize + DeserializeOwned> Table<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            rows: RwLock::new(Vec::new()),
        }
    }

    fn path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.json", self.name))
    }

    async fn load(&self, dir: &Path) -> StorageResult<()> {
        let path = self.path(dir);
        let mut rows = self.rows.write().await;
        if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| StorageError::io(self.name, e))?;
            *rows = serde_json::from_str(&raw).map_err(|e| StorageError::corrupt(self.name, e))?;
        } else {
            rows.clear();
            persist_rows(self.name, &path, &rows)?;
        }
        Ok(())
    }
}

/// Atomic write: serialize to a sibling temp file, then rename over the
/// target. Mode 0600 where supported.
fn persist_rows<T: Serialize>(name: &'static str, path: &Path, rows: &[T]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::io(name, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(rows).map_err(|e| StorageError::corrupt(name, e))?;
    std::fs::write(&tmp, body).map_err(|e| StorageError::io(name, e))?;
    std::fs::rename(&tmp, path).map_err(|e| StorageError::io(name, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = std::fs::metadata(path) {
            let mut perms = meta.permissions();
            perms.set_mode(0o600);
            let _ = std::fs::set_permissions(path, perms);
        }
    }
    Ok(())
}

// ============================================================================
// BACKEND
// ============================================================================

/// The JSON-file storage backend.
pub struct JsonStorage {
    data_dir: PathBuf,
    tenants: Table<TenantRecord>,
    api_keys: Table<ApiKeyRecord>,
    projects: Table<ProjectRecord>,
    agents: Table<AgentRecord>,
    project_agents: Table<ProjectAgentRecord>,
    events: Table<Event>,
    alert_rules: Table<AlertRuleRecord>,
    alert_history: Table<AlertHistoryRecord>,
}

impl JsonStorage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            tenants: Table::new("tenants"),
            api_keys: Table::new("api_keys"),
            projects: Table::new("projects"),
            agents: Table::new("agents"),
            project_agents: Table::new("project_agents"),
            events: Table::new("events"),
            alert_rules: Table::new("alert_rules"),
            alert_history: Table::new("alert_history"),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn persist<T: Serialize>(&self, table: &Table<T>, rows: &[T]) -> StorageResult<()>
    where
        T: DeserializeOwned,
    {
        persist_rows(table.name, &table.path(&self.data_dir), rows)
    }

    /// Event filter shared by the events endpoint and derived reads.
    fn event_matches(event: &Event, q: &EventQuery) -> bool {
        if let Some(pid) = &q.project_id {
            if event.project_id.as_deref() != Some(pid.as_str()) {
                return false;
            }
        }
        if let Some(aid) = &q.agent_id {
            if &event.agent_id != aid {
                return false;
            }
        }
        if let Some(tid) = &q.task_id {
            if event.task_id.as_deref() != Some(tid.as_str()) {
                return false;
            }
        }
        if let Some(types) = &q.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(sevs) = &q.severities {
            if !sevs.contains(&event.severity) {
                return false;
            }
        }
        if let Some(env) = &q.environment {
            if &event.environment != env {
                return false;
            }
        }
        if let Some(group) = &q.group {
            if &event.group != group {
                return false;
            }
        }
        if q.exclude_heartbeats && event.event_type == EventType::Heartbeat {
            return false;
        }
        if let Some(kind) = q.payload_kind {
            if !event.payload_kind_is(kind) {
                return false;
            }
        }
        // Live keys do not see test-key events; test keys see everything.
        if let Some(KeyType::Live) = q.key_type {
            if event.key_type.as_deref() == Some("test") {
                return false;
            }
        }
        if q.since.is_some() || q.until.is_some() {
            match event.parsed_timestamp() {
                Some(ts) => {
                    if let Some(since) = q.since {
                        if ts < since {
                            return false;
                        }
                    }
                    if let Some(until) = q.until {
                        if ts >= until {
                            return false;
                        }
                    }
                }
                // Unparseable timestamps never match a time range.
                None => return false,
            }
        }
        true
    }

    /// Millisecond sort key; unparseable timestamps sort first.
    fn ts_key(event: &Event) -> i64 {
        event
            .parsed_timestamp()
            .map(|t| t.timestamp_millis())
            .unwrap_or(i64::MIN)
    }

    /// Snapshot of events matching a filter, unsorted.
    async fn filter_events(&self, tenant_id: &str, q: &EventQuery) -> Vec<Event> {
        let rows = self.events.rows.read().await;
        rows.iter()
            .filter(|e| e.tenant_id == tenant_id && Self::event_matches(e, q))
            .cloned()
            .collect()
    }

    /// Snapshot of llm_call events matching cost filters, unsorted.
    async fn filter_llm_events(
        &self,
        tenant_id: &str,
        agent_id: Option<&str>,
        project_id: Option<&str>,
        model: Option<&str>,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Vec<Event> {
        let rows = self.events.rows.read().await;
        rows.iter()
            .filter(|e| {
                if e.tenant_id != tenant_id {
                    return false;
                }
                if let Some(aid) = agent_id {
                    if e.agent_id != aid {
                        return false;
                    }
                }
                if let Some(pid) = project_id {
                    if e.project_id.as_deref() != Some(pid) {
                        return false;
                    }
                }
                let payload = match &e.payload {
                    Some(p) if p.is_kind(PayloadKind::LlmCall) => p,
                    _ => return false,
                };
                if let Some(m) = model {
                    if payload.data_str("model") != Some(m) {
                        return false;
                    }
                }
                if since.is_some() || until.is_some() {
                    match e.parsed_timestamp() {
                        Some(ts) => {
                            if let Some(s) = since {
                                if ts < s {
                                    return false;
                                }
                            }
                            if let Some(u) = until {
                                if ts >= u {
                                    return false;
                                }
                            }
                        }
                        None => return false,
                    }
                }
                true
            })
            .cloned()
            .collect()
    }

    /// Custom events for one agent carrying pipeline payload kinds,
    /// chronological.
    async fn pipeline_events(&self, tenant_id: &str, agent_id: &str) -> Vec<Event> {
        const PIPELINE_KINDS: [PayloadKind; 4] = [
            PayloadKind::QueueSnapshot,
            PayloadKind::Todo,
            PayloadKind::Scheduled,
            PayloadKind::Issue,
        ];
        let rows = self.events.rows.read().await;
        let mut out: Vec<Event> = rows
            .iter()
            .filter(|e| {
                e.tenant_id == tenant_id
                    && e.agent_id == agent_id
                    && e.event_type == EventType::Custom
                    && e.payload
                        .as_ref()
                        .and_then(|p| p.well_known_kind())
                        .is_some_and(|k| PIPELINE_KINDS.contains(&k))
            })
            .cloned()
            .collect();
        out.sort_by_key(Self::ts_key);
        out
    }
}

/// Cursor pagination over already-sorted rows: cursor is the id of the
/// last row of the previous page.
fn paginate<T>(
    mut rows: Vec<T>,
    cursor: Option<&str>,
    limit: usize,
    id_of: impl Fn(&T) -> &str,
) -> Page<T> {
    if let Some(cursor) = cursor {
        match rows.iter().position(|r| id_of(r) == cursor) {
            Some(idx) => {
                rows.drain(..=idx);
            }
            None => rows.clear(),
        }
    }
    let has_more = rows.len() > limit;
    rows.truncate(limit);
    let next_cursor = if has_more {
        rows.last().map(|r| id_of(r).to_string())
    } else {
        None
    };
    Page {
        data: rows,
        pagination: PaginationInfo {
            cursor: next_cursor,
            has_more,
        },
    }
}

/// Sum of llm_call cost in one event's payload, 0 when absent.
fn event_llm_cost(event: &Event) -> f64 {
    event
        .payload
        .as_ref()
        .filter(|p| p.is_kind(PayloadKind::LlmCall))
        .and_then(|p| p.data_f64("cost"))
        .unwrap_or(0.0)
}

#[async_trait]
impl StorageBackend for JsonStorage {
    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    async fn initialize(&self) -> StorageResult<()> {
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| StorageError::io("tenants", e))?;
        self.tenants.load(&self.data_dir).await?;
        self.api_keys.load(&self.data_dir).await?;
        self.projects.load(&self.data_dir).await?;
        self.agents.load(&self.data_dir).await?;
        self.project_agents.load(&self.data_dir).await?;
        self.events.load(&self.data_dir).await?;
        self.alert_rules.load(&self.data_dir).await?;
        self.alert_history.load(&self.data_dir).await?;
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        self.persist(&self.tenants, &self.tenants.rows.read().await)?;
        self.persist(&self.api_keys, &self.api_keys.rows.read().await)?;
        self.persist(&self.projects, &self.projects.rows.read().await)?;
        self.persist(&self.agents, &self.agents.rows.read().await)?;
        self.persist(&self.project_agents, &self.project_agents.rows.read().await)?;
        self.persist(&self.events, &self.events.rows.read().await)?;
        self.persist(&self.alert_rules, &self.alert_rules.rows.read().await)?;
        self.persist(&self.alert_history, &self.alert_history.rows.read().await)?;
        Ok(())
    }

    // ========================================================================
    // TENANTS
    // ========================================================================

    async fn create_tenant(
        &self,
        tenant_id: &str,
        name: &str,
        slug: &str,
        plan: TenantPlan,
    ) -> StorageResult<TenantRecord> {
        let now = Utc::now();
        let record = TenantRecord {
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            slug: slug.to_string(),
            plan,
            created_at: now,
            updated_at: now,
            settings: Map::new(),
        };
        {
            let mut rows = self.tenants.rows.write().await;
            if rows.iter().any(|t| t.tenant_id == tenant_id) {
                return Err(StorageError::Conflict(format!(
                    "tenant '{tenant_id}' already exists"
                )));
            }
            rows.push(record.clone());
            self.persist(&self.tenants, &rows)?;
        }

        // Every tenant owns a default project from birth.
        self.create_project(
            tenant_id,
            ProjectCreate {
                name: "Default".to_string(),
                slug: "default".to_string(),
                description: None,
                settings: Map::new(),
                auto_created: false,
            },
        )
        .await?;
        Ok(record)
    }

    async fn get_tenant(&self, tenant_id: &str) -> StorageResult<Option<TenantRecord>> {
        let rows = self.tenants.rows.read().await;
        Ok(rows.iter().find(|t| t.tenant_id == tenant_id).cloned())
    }

    // ========================================================================
    // API KEYS
    // ========================================================================

    async fn create_api_key(&self, record: ApiKeyRecord) -> StorageResult<ApiKeyRecord> {
        let mut rows = self.api_keys.rows.write().await;
        rows.push(record.clone());
        self.persist(&self.api_keys, &rows)?;
        Ok(record)
    }

    async fn authenticate(&self, key_hash: &str) -> StorageResult<Option<ApiKeyInfo>> {
        let rows = self.api_keys.rows.read().await;
        Ok(rows
            .iter()
            .find(|k| k.key_hash == key_hash && k.is_active)
            .map(|k| ApiKeyInfo {
                key_id: k.key_id.clone(),
                tenant_id: k.tenant_id.clone(),
                key_type: k.key_type,
            }))
    }

    async fn touch_api_key(&self, key_id: &str) -> StorageResult<()> {
        let mut rows = self.api_keys.rows.write().await;
        if let Some(key) = rows.iter_mut().find(|k| k.key_id == key_id) {
            key.last_used_at = Some(Utc::now());
            self.persist(&self.api_keys, &rows)?;
        }
        Ok(())
    }

    async fn list_api_keys(&self, tenant_id: &str) -> StorageResult<Vec<ApiKeyRecord>> {
        let rows = self.api_keys.rows.read().await;
        Ok(rows
            .iter()
            .filter(|k| k.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn revoke_api_key(&self, tenant_id: &str, key_id: &str) -> StorageResult<bool> {
        let mut rows = self.api_keys.rows.write().await;
        let Some(key) = rows
            .iter_mut()
            .find(|k| k.key_id == key_id && k.tenant_id == tenant_id && k.is_active)
        else {
            return Ok(false);
        };
        key.is_active = false;
        key.revoked_at = Some(Utc::now());
        self.persist(&self.api_keys, &rows)?;
        Ok(true)
    }

    // ========================================================================
    // PROJECTS
    // ========================================================================

    async fn create_project(
        &self,
        tenant_id: &str,
        project: ProjectCreate,
    ) -> StorageResult<ProjectRecord> {
        let now = Utc::now();
        let record = ProjectRecord {
            project_id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: project.name,
            slug: project.slug,
            description: project.description,
            settings: project.settings,
            is_archived: false,
            auto_created: project.auto_created,
            created_at: now,
            updated_at: now,
        };
        let mut rows = self.projects.rows.write().await;
        if rows
            .iter()
            .any(|p| p.tenant_id == tenant_id && p.slug == record.slug)
        {
            return Err(StorageError::Conflict(format!(
                "project slug '{}' already exists",
                record.slug
            )));
        }
        rows.push(record.clone());
        self.persist(&self.projects, &rows)?;
        Ok(record)
    }

    async fn get_project(
        &self,
        tenant_id: &str,
        id_or_slug: &str,
    ) -> StorageResult<Option<ProjectRecord>> {
        let rows = self.projects.rows.read().await;
        let by_id = rows
            .iter()
            .find(|p| p.tenant_id == tenant_id && p.project_id == id_or_slug);
        if let Some(found) = by_id {
            return Ok(Some(found.clone()));
        }
        Ok(rows
            .iter()
            .find(|p| p.tenant_id == tenant_id && p.slug == id_or_slug)
            .cloned())
    }

    async fn list_projects(
        &self,
        tenant_id: &str,
        include_archived: bool,
    ) -> StorageResult<Vec<ProjectRecord>> {
        let rows = self.projects.rows.read().await;
        Ok(rows
            .iter()
            .filter(|p| p.tenant_id == tenant_id && (include_archived || !p.is_archived))
            .cloned()
            .collect())
    }

    async fn update_project(
        &self,
        tenant_id: &str,
        project_id: &str,
        updates: ProjectUpdate,
    ) -> StorageResult<Option<ProjectRecord>> {
        let mut rows = self.projects.rows.write().await;
        let Some(project) = rows
            .iter_mut()
            .find(|p| p.tenant_id == tenant_id && p.project_id == project_id)
        else {
            return Ok(None);
        };
        if let Some(name) = updates.name {
            project.name = name;
        }
        if let Some(slug) = updates.slug {
            project.slug = slug;
        }
        if let Some(description) = updates.description {
            project.description = Some(description);
        }
        if let Some(settings) = updates.settings {
            project.settings = settings;
        }
        project.updated_at = Utc::now();
        let updated = project.clone();
        self.persist(&self.projects, &rows)?;
        Ok(Some(updated))
    }

    async fn set_project_archived(
        &self,
        tenant_id: &str,
        project_id: &str,
        archived: bool,
    ) -> StorageResult<bool> {
        let mut rows = self.projects.rows.write().await;
        let Some(project) = rows
            .iter_mut()
            .find(|p| p.tenant_id == tenant_id && p.project_id == project_id)
        else {
            return Ok(false);
        };
        project.is_archived = archived;
        project.updated_at = Utc::now();
        self.persist(&self.projects, &rows)?;
        Ok(true)
    }

    async fn count_projects(&self, tenant_id: &str) -> StorageResult<usize> {
        let rows = self.projects.rows.read().await;
        Ok(rows
            .iter()
            .filter(|p| p.tenant_id == tenant_id && !p.is_archived)
            .count())
    }

    async fn count_project_events(
        &self,
        tenant_id: &str,
        project_id: &str,
    ) -> StorageResult<usize> {
        let rows = self.events.rows.read().await;
        Ok(rows
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.project_id.as_deref() == Some(project_id))
            .count())
    }

    async fn reassign_events(
        &self,
        tenant_id: &str,
        from_project_id: &str,
        to_project_id: &str,
    ) -> StorageResult<usize> {
        let mut rows = self.events.rows.write().await;
        let mut moved = 0;
        for event in rows.iter_mut() {
            if event.tenant_id == tenant_id
                && event.project_id.as_deref() == Some(from_project_id)
            {
                event.project_id = Some(to_project_id.to_string());
                moved += 1;
            }
        }
        if moved > 0 {
            self.persist(&self.events, &rows)?;
        }
        Ok(moved)
    }

    // ========================================================================
    // AGENTS
    // ========================================================================

    async fn upsert_agent(
        &self,
        tenant_id: &str,
        agent_id: &str,
        upsert: AgentUpsert,
        now: DateTime<Utc>,
    ) -> StorageResult<AgentRecord> {
        let mut rows = self.agents.rows.write().await;
        let existing = rows
            .iter_mut()
            .find(|a| a.tenant_id == tenant_id && a.agent_id == agent_id);

        let record = match existing {
            None => {
                let record = AgentRecord {
                    agent_id: agent_id.to_string(),
                    tenant_id: tenant_id.to_string(),
                    agent_type: upsert.agent_type.unwrap_or_else(|| "general".to_string()),
                    agent_version: upsert.agent_version,
                    framework: upsert.framework,
                    runtime: upsert.runtime,
                    sdk_version: upsert.sdk_version,
                    environment: upsert
                        .environment
                        .unwrap_or_else(|| "production".to_string()),
                    group: upsert.group.unwrap_or_else(|| "default".to_string()),
                    first_seen: upsert.last_seen,
                    last_seen: upsert.last_seen,
                    last_heartbeat: upsert.last_heartbeat,
                    last_event_type: upsert.last_event_type,
                    last_task_id: upsert.last_task_id,
                    last_project_id: upsert.last_project_id,
                    stuck_threshold_seconds: upsert
                        .stuck_threshold_seconds
                        .unwrap_or(loophive_core::DEFAULT_STUCK_THRESHOLD_SECONDS),
                    is_registered: true,
                    previous_status: None,
                };
                rows.push(record.clone());
                record
            }
            Some(agent) => {
                // Snapshot the derived status before mutating; this is
                // what status-change broadcasting compares against.
                let prev_status = derive_agent_status(agent, now);
                agent.previous_status = Some(prev_status);
                agent.last_seen = upsert.last_seen;
                if let Some(agent_type) = upsert.agent_type {
                    agent.agent_type = agent_type;
                }
                if let Some(version) = upsert.agent_version {
                    agent.agent_version = Some(version);
                }
                if let Some(framework) = upsert.framework {
                    agent.framework = Some(framework);
                }
                if let Some(runtime) = upsert.runtime {
                    agent.runtime = Some(runtime);
                }
                if let Some(sdk_version) = upsert.sdk_version {
                    agent.sdk_version = Some(sdk_version);
                }
                if let Some(environment) = upsert.environment {
                    agent.environment = environment;
                }
                if let Some(group) = upsert.group {
                    agent.group = group;
                }
                if let Some(heartbeat) = upsert.last_heartbeat {
                    agent.last_heartbeat = Some(heartbeat);
                }
                if let Some(event_type) = upsert.last_event_type {
                    agent.last_event_type = Some(event_type);
                }
                if let Some(task_id) = upsert.last_task_id {
                    agent.last_task_id = Some(task_id);
                }
                if let Some(project_id) = upsert.last_project_id {
                    agent.last_project_id = Some(project_id);
                }
                if let Some(threshold) = upsert.stuck_threshold_seconds {
                    agent.stuck_threshold_seconds = threshold;
                }
                agent.clone()
            }
        };

        self.persist(&self.agents, &rows)?;
        Ok(record)
    }

    async fn get_agent(
        &self,
        tenant_id: &str,
        agent_id: &str,
    ) -> StorageResult<Option<AgentRecord>> {
        let rows = self.agents.rows.read().await;
        Ok(rows
            .iter()
            .find(|a| a.tenant_id == tenant_id && a.agent_id == agent_id)
            .cloned())
    }

    async fn list_agents(
        &self,
        tenant_id: &str,
        query: AgentQuery,
    ) -> StorageResult<Vec<AgentRecord>> {
        // Project filter goes through the junction table.
        let project_members: Option<HashSet<String>> = match &query.project_id {
            Some(project_id) => {
                let junction = self.project_agents.rows.read().await;
                Some(
                    junction
                        .iter()
                        .filter(|j| j.tenant_id == tenant_id && &j.project_id == project_id)
                        .map(|j| j.agent_id.clone())
                        .collect(),
                )
            }
            None => None,
        };

        let rows = self.agents.rows.read().await;
        let mut agents: Vec<AgentRecord> = rows
            .iter()
            .filter(|a| {
                if a.tenant_id != tenant_id {
                    return false;
                }
                if let Some(members) = &project_members {
                    if !members.contains(&a.agent_id) {
                        return false;
                    }
                }
                if let Some(env) = &query.environment {
                    if &a.environment != env {
                        return false;
                    }
                }
                if let Some(group) = &query.group {
                    if &a.group != group {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        agents.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        agents.truncate(query.limit.max(1));
        Ok(agents)
    }

    async fn agent_hour_stats(
        &self,
        tenant_id: &str,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<AgentHourStats> {
        let query = EventQuery {
            agent_id: Some(agent_id.to_string()),
            since: Some(now - Duration::hours(1)),
            exclude_heartbeats: true,
            limit: usize::MAX,
            ..EventQuery::new()
        };
        let events = self.filter_events(tenant_id, &query).await;

        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut durations: Vec<i64> = Vec::new();
        let mut total_cost = 0.0;
        for event in &events {
            match event.event_type {
                EventType::TaskCompleted => {
                    completed += 1;
                    if let Some(d) = event.duration_ms {
                        durations.push(d);
                    }
                }
                EventType::TaskFailed => failed += 1,
                _ => {}
            }
            total_cost += event_llm_cost(event);
        }

        let total = completed + failed;
        let success_rate = (total > 0).then(|| completed as f64 / total as f64 * 100.0);
        let avg_duration_ms = (!durations.is_empty())
            .then(|| durations.iter().sum::<i64>() / durations.len() as i64);

        let pipeline = self.get_pipeline(tenant_id, agent_id).await?;
        Ok(AgentHourStats {
            tasks_completed: completed,
            tasks_failed: failed,
            success_rate,
            avg_duration_ms,
            total_cost: (total_cost > 0.0).then_some(total_cost),
            throughput: completed,
            queue_depth: pipeline.queue_depth(),
            active_issues: pipeline.issues.len(),
        })
    }

    // ========================================================================
    // PROJECT-AGENT JUNCTION
    // ========================================================================

    async fn upsert_project_agent(
        &self,
        tenant_id: &str,
        project_id: &str,
        agent_id: &str,
    ) -> StorageResult<()> {
        let mut rows = self.project_agents.rows.write().await;
        let exists = rows.iter().any(|j| {
            j.tenant_id == tenant_id && j.project_id == project_id && j.agent_id == agent_id
        });
        if exists {
            return Ok(());
        }
        rows.push(ProjectAgentRecord {
            tenant_id: tenant_id.to_string(),
            project_id: project_id.to_string(),
            agent_id: agent_id.to_string(),
            added_at: Utc::now(),
        });
        self.persist(&self.project_agents, &rows)?;
        Ok(())
    }

    async fn list_project_agents(
        &self,
        tenant_id: &str,
        project_id: &str,
    ) -> StorageResult<Vec<ProjectAgentRecord>> {
        let rows = self.project_agents.rows.read().await;
        Ok(rows
            .iter()
            .filter(|j| j.tenant_id == tenant_id && j.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn remove_project_agent(
        &self,
        tenant_id: &str,
        project_id: &str,
        agent_id: &str,
    ) -> StorageResult<bool> {
        let mut rows = self.project_agents.rows.write().await;
        let before = rows.len();
        rows.retain(|j| {
            !(j.tenant_id == tenant_id && j.project_id == project_id && j.agent_id == agent_id)
        });
        let removed = rows.len() < before;
        if removed {
            self.persist(&self.project_agents, &rows)?;
        }
        Ok(removed)
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    async fn insert_events(&self, events: Vec<Event>) -> StorageResult<usize> {
        let mut rows = self.events.rows.write().await;
        let mut seen: HashSet<(String, String)> = rows
            .iter()
            .map(|e| (e.tenant_id.clone(), e.event_id.clone()))
            .collect();
        let mut inserted = 0;
        for event in events {
            let key = (event.tenant_id.clone(), event.event_id.clone());
            if seen.contains(&key) {
                continue;
            }
            seen.insert(key);
            rows.push(event);
            inserted += 1;
        }
        if inserted > 0 {
            self.persist(&self.events, &rows)?;
        }
        Ok(inserted)
    }

    async fn get_events(&self, tenant_id: &str, query: EventQuery) -> StorageResult<Page<Event>> {
        let mut matched = self.filter_events(tenant_id, &query).await;
        // Reverse chronological for activity-style reads.
        matched.sort_by_key(|e| std::cmp::Reverse(Self::ts_key(e)));
        Ok(paginate(matched, query.cursor.as_deref(), query.limit, |e| {
            &e.event_id
        }))
    }

    async fn get_task_events(&self, tenant_id: &str, task_id: &str) -> StorageResult<Vec<Event>> {
        let rows = self.events.rows.read().await;
        let mut matched: Vec<Event> = rows
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.task_id.as_deref() == Some(task_id))
            .cloned()
            .collect();
        matched.sort_by_key(Self::ts_key);
        Ok(matched)
    }

    // ========================================================================
    // DERIVED READS
    // ========================================================================

    async fn list_tasks(
        &self,
        tenant_id: &str,
        query: TaskQuery,
    ) -> StorageResult<Page<TaskSummary>> {
        // GROUP BY task_id in memory.
        let mut task_events: HashMap<String, Vec<Event>> = HashMap::new();
        {
            let rows = self.events.rows.read().await;
            for event in rows.iter() {
                if event.tenant_id != tenant_id {
                    continue;
                }
                let Some(task_id) = &event.task_id else {
                    continue;
                };
                if let Some(aid) = &query.agent_id {
                    if &event.agent_id != aid {
                        continue;
                    }
                }
                if let Some(pid) = &query.project_id {
                    if event.project_id.as_deref() != Some(pid.as_str()) {
                        continue;
                    }
                }
                if let Some(tt) = &query.task_type {
                    if event.task_type.as_deref() != Some(tt.as_str()) {
                        continue;
                    }
                }
                if let Some(env) = &query.environment {
                    if &event.environment != env {
                        continue;
                    }
                }
                task_events
                    .entry(task_id.clone())
                    .or_default()
                    .push(event.clone());
            }
        }

        let mut summaries: Vec<TaskSummary> = Vec::with_capacity(task_events.len());
        for (task_id, mut events) in task_events {
            events.sort_by_key(Self::ts_key);
            let event_types: HashSet<EventType> =
                events.iter().map(|e| e.event_type).collect();
            let derived = derive_task_status(&event_types);
            if let Some(wanted) = query.status {
                if derived != wanted {
                    continue;
                }
            }

            let first = &events[0];
            let started_at = first.parsed_timestamp();
            if let Some(since) = query.since {
                if started_at.is_some_and(|t| t < since) {
                    continue;
                }
            }
            if let Some(until) = query.until {
                if started_at.is_some_and(|t| t >= until) {
                    continue;
                }
            }

            let mut duration_ms = None;
            let mut completed_at = None;
            let mut total_cost = 0.0;
            let mut tokens_in = 0i64;
            let mut tokens_out = 0i64;
            let mut llm_call_count = 0usize;
            for event in &events {
                if matches!(
                    event.event_type,
                    EventType::TaskCompleted | EventType::TaskFailed
                ) {
                    duration_ms = event.duration_ms;
                    completed_at = Some(event.timestamp.clone());
                }
                if let Some(payload) = &event.payload {
                    if payload.is_kind(PayloadKind::LlmCall) {
                        total_cost += payload.data_f64("cost").unwrap_or(0.0);
                        tokens_in += payload.data_i64("tokens_in").unwrap_or(0);
                        tokens_out += payload.data_i64("tokens_out").unwrap_or(0);
                        llm_call_count += 1;
                    }
                }
            }

            let action_count = events
                .iter()
                .filter(|e| e.event_type == EventType::ActionStarted)
                .count();
            let error_count = events
                .iter()
                .filter(|e| {
                    matches!(
                        e.event_type,
                        EventType::ActionFailed | EventType::TaskFailed
                    )
                })
                .count();

            summaries.push(TaskSummary {
                task_id,
                task_type: first.task_type.clone(),
                task_run_id: first.task_run_id.clone(),
                agent_id: first.agent_id.clone(),
                project_id: first.project_id.clone(),
                derived_status: derived,
                started_at: first.timestamp.clone(),
                completed_at,
                duration_ms,
                total_cost: (total_cost > 0.0).then_some(total_cost),
                action_count,
                error_count,
                has_escalation: event_types.contains(&EventType::Escalated),
                has_human_intervention: event_types.contains(&EventType::ApprovalRequested)
                    || event_types.contains(&EventType::ApprovalReceived),
                llm_call_count,
                total_tokens_in: tokens_in,
                total_tokens_out: tokens_out,
            });
        }

        match query.sort {
            TaskSort::Newest => summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at)),
            TaskSort::Oldest => summaries.sort_by(|a, b| a.started_at.cmp(&b.started_at)),
            TaskSort::Duration => {
                summaries.sort_by_key(|s| std::cmp::Reverse(s.duration_ms.unwrap_or(0)))
            }
            TaskSort::Cost => summaries.sort_by(|a, b| {
                b.total_cost
                    .unwrap_or(0.0)
                    .total_cmp(&a.total_cost.unwrap_or(0.0))
            }),
        }

        Ok(paginate(
            summaries,
            query.cursor.as_deref(),
            query.limit,
            |t| &t.task_id,
        ))
    }

    async fn get_metrics(
        &self,
        tenant_id: &str,
        query: MetricsQuery,
        now: DateTime<Utc>,
    ) -> StorageResult<MetricsResponse> {
        let range_secs = range_seconds(&query.range).unwrap_or(3600);
        let range = if range_seconds(&query.range).is_some() {
            query.range.clone()
        } else {
            "1h".to_string()
        };
        let interval = query
            .interval
            .clone()
            .unwrap_or_else(|| auto_interval(&range).to_string());
        let interval_secs = interval_seconds(&interval).unwrap_or(300);
        let since = now - Duration::seconds(range_secs);

        let events = self
            .filter_events(
                tenant_id,
                &EventQuery {
                    agent_id: query.agent_id.clone(),
                    project_id: query.project_id.clone(),
                    environment: query.environment.clone(),
                    since: Some(since),
                    exclude_heartbeats: true,
                    limit: usize::MAX,
                    ..EventQuery::new()
                },
            )
            .await;

        // Task-level rollup.
        let mut task_events: HashMap<&str, Vec<&Event>> = HashMap::new();
        for event in &events {
            if let Some(task_id) = &event.task_id {
                task_events.entry(task_id).or_default().push(event);
            }
        }

        let total_tasks = task_events.len();
        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut escalated = 0usize;
        let mut durations: Vec<i64> = Vec::new();
        let mut total_cost = 0.0;
        for events in task_events.values() {
            let types: HashSet<EventType> = events.iter().map(|e| e.event_type).collect();
            match derive_task_status(&types) {
                TaskStatus::Completed => completed += 1,
                TaskStatus::Failed => failed += 1,
                TaskStatus::Escalated => escalated += 1,
                _ => {}
            }
            for event in events {
                if matches!(
                    event.event_type,
                    EventType::TaskCompleted | EventType::TaskFailed
                ) {
                    if let Some(d) = event.duration_ms {
                        durations.push(d);
                    }
                }
                total_cost += event_llm_cost(event);
            }
        }

        let stuck = {
            let agents = self.agents.rows.read().await;
            agents
                .iter()
                .filter(|a| {
                    a.tenant_id == tenant_id
                        && derive_agent_status(a, now) == AgentStatus::Stuck
                })
                .count()
        };

        let summary = MetricsSummary {
            total_tasks,
            completed,
            failed,
            escalated,
            stuck,
            success_rate: (total_tasks > 0)
                .then(|| completed as f64 / total_tasks as f64 * 100.0),
            avg_duration_ms: (!durations.is_empty())
                .then(|| durations.iter().sum::<i64>() / durations.len() as i64),
            total_cost: (total_cost > 0.0).then_some(total_cost),
            avg_cost_per_task: (total_tasks > 0 && total_cost > 0.0)
                .then(|| total_cost / total_tasks as f64),
        };

        // Timeseries buckets over [since, now).
        let mut timeseries = Vec::new();
        let mut bucket_start = since;
        while bucket_start < now {
            let bucket_end = bucket_start + Duration::seconds(interval_secs);
            let mut bucket = TimeseriesBucket {
                timestamp: to_iso(bucket_start),
                ..Default::default()
            };
            let mut bucket_durations: Vec<i64> = Vec::new();
            for event in &events {
                let Some(ts) = event.parsed_timestamp() else {
                    continue;
                };
                if ts < bucket_start || ts >= bucket_end {
                    continue;
                }
                if event.task_id.is_none() {
                    continue;
                }
                match event.event_type {
                    EventType::TaskCompleted => {
                        bucket.tasks_completed += 1;
                        if let Some(d) = event.duration_ms {
                            bucket_durations.push(d);
                        }
                    }
                    EventType::TaskFailed => bucket.tasks_failed += 1,
                    _ => {}
                }
                if matches!(
                    event.event_type,
                    EventType::ActionFailed | EventType::TaskFailed
                ) {
                    bucket.error_count += 1;
                }
                bucket.cost += event_llm_cost(event);
            }
            bucket.avg_duration_ms = (!bucket_durations.is_empty())
                .then(|| bucket_durations.iter().sum::<i64>() / bucket_durations.len() as i64);
            bucket.throughput = bucket.tasks_completed;
            timeseries.push(bucket);
            bucket_start = bucket_end;
        }

        // Optional group_by breakdown.
        let groups = match query.group_by.as_deref() {
            Some(group_by @ ("agent" | "model")) => {
                let mut grouped: HashMap<String, MetricsGroup> = HashMap::new();
                for event in &events {
                    let key = if group_by == "agent" {
                        event.agent_id.clone()
                    } else {
                        match event
                            .payload
                            .as_ref()
                            .filter(|p| p.is_kind(PayloadKind::LlmCall))
                            .and_then(|p| p.data_str("model"))
                        {
                            Some(model) => model.to_string(),
                            None => continue,
                        }
                    };
                    let entry = grouped.entry(key.clone()).or_insert_with(|| MetricsGroup {
                        key,
                        ..Default::default()
                    });
                    match event.event_type {
                        EventType::TaskCompleted => entry.tasks_completed += 1,
                        EventType::TaskFailed => entry.tasks_failed += 1,
                        _ => {}
                    }
                    entry.total_cost += event_llm_cost(event);
                }
                Some(grouped.into_values().collect())
            }
            _ => None,
        };

        Ok(MetricsResponse {
            range,
            interval,
            summary,
            timeseries,
            groups,
        })
    }

    async fn cost_summary(
        &self,
        tenant_id: &str,
        query: CostQuery,
        now: DateTime<Utc>,
    ) -> StorageResult<CostSummary> {
        let range_secs = range_seconds(&query.range).unwrap_or(86_400);
        let since = now - Duration::seconds(range_secs);
        let rows = self
            .filter_llm_events(
                tenant_id,
                query.agent_id.as_deref(),
                query.project_id.as_deref(),
                None,
                Some(since),
                None,
            )
            .await;

        let mut summary = CostSummary {
            call_count: rows.len(),
            ..Default::default()
        };
        let mut by_agent: HashMap<String, CostBreakdownRow> = HashMap::new();
        let mut by_model: HashMap<String, CostBreakdownRow> = HashMap::new();

        for event in &rows {
            let Some(payload) = event.payload.as_ref() else {
                continue;
            };
            let cost = payload.data_f64("cost").unwrap_or(0.0);
            let tokens_in = payload.data_i64("tokens_in").unwrap_or(0);
            let tokens_out = payload.data_i64("tokens_out").unwrap_or(0);
            summary.total_cost += cost;
            summary.total_tokens_in += tokens_in;
            summary.total_tokens_out += tokens_out;
            match payload.data_str("cost_source") {
                Some("reported") => summary.reported_cost += cost,
                Some("estimated") => summary.estimated_cost += cost,
                _ => {}
            }

            let model = payload.data_str("model").unwrap_or("unknown").to_string();
            for (key, map) in [
                (event.agent_id.clone(), &mut by_agent),
                (model, &mut by_model),
            ] {
                let row = map.entry(key.clone()).or_insert_with(|| CostBreakdownRow {
                    key,
                    ..Default::default()
                });
                row.cost += cost;
                row.call_count += 1;
                row.tokens_in += tokens_in;
                row.tokens_out += tokens_out;
            }
        }

        summary.by_agent = by_agent.into_values().collect();
        summary.by_model = by_model.into_values().collect();
        summary.by_agent.sort_by(|a, b| b.cost.total_cmp(&a.cost));
        summary.by_model.sort_by(|a, b| b.cost.total_cmp(&a.cost));
        Ok(summary)
    }

    async fn cost_calls(
        &self,
        tenant_id: &str,
        query: CostCallsQuery,
    ) -> StorageResult<Page<LlmCallRecord>> {
        let mut rows = self
            .filter_llm_events(
                tenant_id,
                query.agent_id.as_deref(),
                query.project_id.as_deref(),
                query.model.as_deref(),
                query.since,
                query.until,
            )
            .await;
        rows.sort_by_key(|e| std::cmp::Reverse(Self::ts_key(e)));

        let page = paginate(rows, query.cursor.as_deref(), query.limit, |e| &e.event_id);
        let records = page
            .data
            .into_iter()
            .map(|event| {
                let payload = event.payload.clone().unwrap_or_default();
                LlmCallRecord {
                    event_id: event.event_id.clone(),
                    agent_id: event.agent_id.clone(),
                    project_id: event.project_id.clone(),
                    task_id: event.task_id.clone(),
                    timestamp: event.timestamp.clone(),
                    name: payload.data_str("name").unwrap_or("unknown").to_string(),
                    model: payload.data_str("model").unwrap_or("unknown").to_string(),
                    tokens_in: payload.data_i64("tokens_in"),
                    tokens_out: payload.data_i64("tokens_out"),
                    cost: payload.data_f64("cost"),
                    duration_ms: payload.data_i64("duration_ms"),
                    cost_source: payload.data_str("cost_source").map(str::to_string),
                    cost_model_matched: payload
                        .data_str("cost_model_matched")
                        .map(str::to_string),
                    prompt_preview: payload.data_str("prompt_preview").map(str::to_string),
                    response_preview: payload.data_str("response_preview").map(str::to_string),
                }
            })
            .collect();
        Ok(Page {
            data: records,
            pagination: page.pagination,
        })
    }

    async fn cost_timeseries(
        &self,
        tenant_id: &str,
        query: CostQuery,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<CostTimeBucket>> {
        let range_secs = range_seconds(&query.range).unwrap_or(86_400);
        let since = now - Duration::seconds(range_secs);
        let interval = query
            .interval
            .clone()
            .unwrap_or_else(|| auto_interval(&query.range).to_string());
        let interval_secs = interval_seconds(&interval).unwrap_or(3600);

        let rows = self
            .filter_llm_events(
                tenant_id,
                query.agent_id.as_deref(),
                query.project_id.as_deref(),
                None,
                Some(since),
                None,
            )
            .await;

        let mut buckets = Vec::new();
        let mut bucket_start = since;
        while bucket_start < now {
            let bucket_end = bucket_start + Duration::seconds(interval_secs);
            let mut bucket = CostTimeBucket {
                timestamp: to_iso(bucket_start),
                ..Default::default()
            };
            for event in &rows {
                let Some(ts) = event.parsed_timestamp() else {
                    continue;
                };
                if ts < bucket_start || ts >= bucket_end {
                    continue;
                }
                let Some(payload) = event.payload.as_ref() else {
                    continue;
                };
                bucket.cost += payload.data_f64("cost").unwrap_or(0.0);
                bucket.tokens_in += payload.data_i64("tokens_in").unwrap_or(0);
                bucket.tokens_out += payload.data_i64("tokens_out").unwrap_or(0);
                bucket.call_count += 1;
            }
            buckets.push(bucket);
            bucket_start = bucket_end;
        }
        Ok(buckets)
    }

    async fn get_pipeline(
        &self,
        tenant_id: &str,
        agent_id: &str,
    ) -> StorageResult<PipelineState> {
        let events = self.pipeline_events(tenant_id, agent_id).await;

        // Queue: latest snapshot with snapshot_at attached.
        let queue = events
            .iter()
            .rev()
            .find(|e| e.payload_kind_is(PayloadKind::QueueSnapshot))
            .and_then(|event| {
                let payload = event.payload.as_ref()?;
                let mut data = payload
                    .data
                    .clone()
                    .and_then(|d| d.as_object().cloned())
                    .unwrap_or_default();
                data.insert("snapshot_at".to_string(), json!(event.timestamp));
                Some(JsonValue::Object(data))
            });

        // TODOs: group by todo_id keeping the latest event, drop finished.
        let mut todos_by_id: HashMap<String, JsonValue> = HashMap::new();
        for event in &events {
            if !event.payload_kind_is(PayloadKind::Todo) {
                continue;
            }
            let Some(payload) = event.payload.as_ref() else {
                continue;
            };
            let Some(todo_id) = payload.data_str("todo_id") else {
                continue;
            };
            todos_by_id.insert(
                todo_id.to_string(),
                json!({
                    "todo_id": todo_id,
                    "action": payload.data_field("action"),
                    "priority": payload.data_field("priority"),
                    "source": payload.data_field("source"),
                    "context": payload.data_field("context"),
                    "due_by": payload.data_field("due_by"),
                    "timestamp": event.timestamp,
                }),
            );
        }
        let todos: Vec<JsonValue> = todos_by_id
            .into_values()
            .filter(|t| {
                !matches!(
                    t.get("action").and_then(|a| a.as_str()),
                    Some("completed") | Some("dismissed")
                )
            })
            .collect();

        // Scheduled: item list of the latest scheduled event.
        let scheduled = events
            .iter()
            .rev()
            .find(|e| e.payload_kind_is(PayloadKind::Scheduled))
            .and_then(|event| {
                event
                    .payload
                    .as_ref()
                    .and_then(|p| p.data_field("items"))
                    .and_then(|items| items.as_array().cloned())
            })
            .unwrap_or_default();

        // Issues: group by issue_id (or summary), keep latest, drop resolved.
        let mut issues_by_id: HashMap<String, JsonValue> = HashMap::new();
        for event in &events {
            if !event.payload_kind_is(PayloadKind::Issue) {
                continue;
            }
            let Some(payload) = event.payload.as_ref() else {
                continue;
            };
            let issue_id = payload
                .data_str("issue_id")
                .map(str::to_string)
                .or_else(|| payload.summary.clone())
                .unwrap_or_default();
            issues_by_id.insert(
                issue_id.clone(),
                json!({
                    "issue_id": issue_id,
                    "severity": payload.data_field("severity"),
                    "category": payload.data_field("category"),
                    "context": payload.data_field("context"),
                    "action": payload.data_str("action").unwrap_or("reported"),
                    "occurrence_count": payload.data_field("occurrence_count"),
                    "summary": payload.summary,
                    "timestamp": event.timestamp,
                }),
            );
        }
        let issues: Vec<JsonValue> = issues_by_id
            .into_values()
            .filter(|issue| issue.get("action").and_then(|a| a.as_str()) != Some("resolved"))
            .collect();

        Ok(PipelineState {
            agent_id: agent_id.to_string(),
            queue,
            todos,
            scheduled,
            issues,
        })
    }

    async fn get_fleet_pipeline(&self, tenant_id: &str) -> StorageResult<FleetPipelineState> {
        let agent_ids: Vec<String> = {
            let agents = self.agents.rows.read().await;
            agents
                .iter()
                .filter(|a| a.tenant_id == tenant_id)
                .map(|a| a.agent_id.clone())
                .collect()
        };

        let mut fleet = FleetPipelineState::default();
        for agent_id in agent_ids {
            let pipeline = self.get_pipeline(tenant_id, &agent_id).await?;
            let summary = AgentPipelineSummary {
                agent_id,
                queue_depth: pipeline.queue_depth(),
                active_todos: pipeline.todos.len(),
                active_issues: pipeline.issues.len(),
                scheduled_count: pipeline.scheduled.len(),
            };
            fleet.totals = PipelineTotals {
                queue_depth: fleet.totals.queue_depth + summary.queue_depth,
                active_todos: fleet.totals.active_todos + summary.active_todos,
                active_issues: fleet.totals.active_issues + summary.active_issues,
                scheduled_count: fleet.totals.scheduled_count + summary.scheduled_count,
            };
            fleet.agents.push(summary);
        }
        Ok(fleet)
    }

    // ========================================================================
    // ALERT RULES & HISTORY
    // ========================================================================

    async fn create_alert_rule(
        &self,
        tenant_id: &str,
        rule: AlertRuleCreate,
    ) -> StorageResult<AlertRuleRecord> {
        let now = Utc::now();
        let record = AlertRuleRecord {
            rule_id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            project_id: rule.project_id,
            name: rule.name,
            condition_type: rule.condition_type,
            condition_config: rule.condition_config,
            filters: rule.filters,
            actions: rule.actions,
            cooldown_seconds: rule.cooldown_seconds,
            is_enabled: true,
            created_at: now,
            updated_at: now,
        };
        let mut rows = self.alert_rules.rows.write().await;
        rows.push(record.clone());
        self.persist(&self.alert_rules, &rows)?;
        Ok(record)
    }

    async fn get_alert_rule(
        &self,
        tenant_id: &str,
        rule_id: &str,
    ) -> StorageResult<Option<AlertRuleRecord>> {
        let rows = self.alert_rules.rows.read().await;
        Ok(rows
            .iter()
            .find(|r| r.tenant_id == tenant_id && r.rule_id == rule_id)
            .cloned())
    }

    async fn list_alert_rules(
        &self,
        tenant_id: &str,
        project_id: Option<&str>,
        is_enabled: Option<bool>,
    ) -> StorageResult<Vec<AlertRuleRecord>> {
        let rows = self.alert_rules.rows.read().await;
        Ok(rows
            .iter()
            .filter(|r| {
                r.tenant_id == tenant_id
                    && project_id.is_none_or(|pid| r.project_id.as_deref() == Some(pid))
                    && is_enabled.is_none_or(|enabled| r.is_enabled == enabled)
            })
            .cloned()
            .collect())
    }

    async fn update_alert_rule(
        &self,
        tenant_id: &str,
        rule_id: &str,
        updates: AlertRuleUpdate,
    ) -> StorageResult<Option<AlertRuleRecord>> {
        let mut rows = self.alert_rules.rows.write().await;
        let Some(rule) = rows
            .iter_mut()
            .find(|r| r.tenant_id == tenant_id && r.rule_id == rule_id)
        else {
            return Ok(None);
        };
        if let Some(name) = updates.name {
            rule.name = name;
        }
        if let Some(config) = updates.condition_config {
            rule.condition_config = config;
        }
        if let Some(filters) = updates.filters {
            rule.filters = filters;
        }
        if let Some(actions) = updates.actions {
            rule.actions = actions;
        }
        if let Some(cooldown) = updates.cooldown_seconds {
            rule.cooldown_seconds = cooldown;
        }
        if let Some(enabled) = updates.is_enabled {
            rule.is_enabled = enabled;
        }
        rule.updated_at = Utc::now();
        let updated = rule.clone();
        self.persist(&self.alert_rules, &rows)?;
        Ok(Some(updated))
    }

    async fn delete_alert_rule(&self, tenant_id: &str, rule_id: &str) -> StorageResult<bool> {
        let mut rows = self.alert_rules.rows.write().await;
        let before = rows.len();
        rows.retain(|r| !(r.tenant_id == tenant_id && r.rule_id == rule_id));
        let removed = rows.len() < before;
        if removed {
            self.persist(&self.alert_rules, &rows)?;
        }
        Ok(removed)
    }

    async fn insert_alert(&self, alert: AlertHistoryRecord) -> StorageResult<()> {
        let mut rows = self.alert_history.rows.write().await;
        rows.push(alert);
        self.persist(&self.alert_history, &rows)?;
        Ok(())
    }

    async fn list_alert_history(
        &self,
        tenant_id: &str,
        rule_id: Option<&str>,
        project_id: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
        cursor: Option<&str>,
    ) -> StorageResult<Page<AlertHistoryRecord>> {
        let rows = self.alert_history.rows.read().await;
        let mut matched: Vec<AlertHistoryRecord> = rows
            .iter()
            .filter(|a| {
                a.tenant_id == tenant_id
                    && rule_id.is_none_or(|rid| a.rule_id == rid)
                    && project_id.is_none_or(|pid| a.project_id.as_deref() == Some(pid))
                    && since.is_none_or(|s| a.fired_at >= s)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.fired_at.cmp(&a.fired_at));
        Ok(paginate(matched, cursor, limit, |a| &a.alert_id))
    }

    async fn last_alert_for_rule(
        &self,
        tenant_id: &str,
        rule_id: &str,
    ) -> StorageResult<Option<AlertHistoryRecord>> {
        let rows = self.alert_history.rows.read().await;
        Ok(rows
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.rule_id == rule_id)
            .max_by_key(|a| a.fired_at)
            .cloned())
    }

    // ========================================================================
    // RETENTION
    // ========================================================================

    async fn prune_events(&self, now: DateTime<Utc>) -> StorageResult<PruneStats> {
        // Tenant plans first; the events lock is held once for the whole
        // pass.
        let plans: HashMap<String, TenantPlan> = {
            let tenants = self.tenants.rows.read().await;
            tenants
                .iter()
                .map(|t| (t.tenant_id.clone(), t.plan))
                .collect()
        };

        let mut rows = self.events.rows.write().await;
        let mut stats = PruneStats::default();
        rows.retain(|event| {
            // Unknown tenant or unparseable timestamp: keep defensively.
            let Some(plan) = plans.get(&event.tenant_id) else {
                return true;
            };
            let Some(ts) = event.parsed_timestamp() else {
                return true;
            };
            let age = now - ts;

            // TTL check dominates; anything it rejects counts once here.
            if age > Duration::days(plan.retention_days()) {
                stats.ttl_pruned += 1;
                return false;
            }

            // Cold check applies only to TTL survivors.
            if let Some(horizon) = cold_retention_seconds(event.event_type) {
                if age > Duration::seconds(horizon) {
                    stats.cold_pruned += 1;
                    return false;
                }
            }
            true
        });

        stats.total_pruned = stats.ttl_pruned + stats.cold_pruned;
        if stats.total_pruned > 0 {
            self.persist(&self.events, &rows)?;
            tracing::info!(
                ttl_pruned = stats.ttl_pruned,
                cold_pruned = stats.cold_pruned,
                "Retention pass pruned events"
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> Event {
        Event {
            event_id: id.to_string(),
            tenant_id: "t1".into(),
            agent_id: "a1".into(),
            agent_type: None,
            project_id: None,
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
            event_type: EventType::Custom,
            severity: Default::default(),
            status: None,
            duration_ms: None,
            parent_event_id: None,
            payload: None,
            key_type: None,
        }
    }

    #[test]
    fn test_paginate_no_cursor() {
        let rows: Vec<Event> = (0..5).map(|i| event(&format!("e{i}"))).collect();
        let page = paginate(rows, None, 3, |e| &e.event_id);
        assert_eq!(page.data.len(), 3);
        assert!(page.pagination.has_more);
        assert_eq!(page.pagination.cursor.as_deref(), Some("e2"));
    }

    #[test]
    fn test_paginate_with_cursor_resumes_after() {
        let rows: Vec<Event> = (0..5).map(|i| event(&format!("e{i}"))).collect();
        let page = paginate(rows, Some("e2"), 3, |e| &e.event_id);
        assert_eq!(page.data.len(), 2);
        assert!(!page.pagination.has_more);
        assert!(page.pagination.cursor.is_none());
    }

    #[test]
    fn test_paginate_unknown_cursor_yields_empty() {
        let rows: Vec<Event> = (0..3).map(|i| event(&format!("e{i}"))).collect();
        let page = paginate(rows, Some("missing"), 3, |e| &e.event_id);
        assert!(page.data.is_empty());
        assert!(!page.pagination.has_more);
    }

    #[test]
    fn test_paginate_exact_limit_has_no_more() {
        let rows: Vec<Event> = (0..3).map(|i| event(&format!("e{i}"))).collect();
        let page = paginate(rows, None, 3, |e| &e.event_id);
        assert_eq!(page.data.len(), 3);
        assert!(!page.pagination.has_more);
        assert!(page.pagination.cursor.is_none());
    }

    #[test]
    fn test_event_matches_live_key_hides_test_events() {
        let mut e = event("e1");
        e.key_type = Some("test".into());
        let mut q = EventQuery::new();
        q.exclude_heartbeats = false;
        q.key_type = Some(KeyType::Live);
        assert!(!JsonStorage::event_matches(&e, &q));
        q.key_type = Some(KeyType::Test);
        assert!(JsonStorage::event_matches(&e, &q));
    }

    #[test]
    fn test_event_matches_time_range_excludes_unparseable() {
        let mut e = event("e1");
        e.timestamp = "not-a-date".into();
        let mut q = EventQuery::new();
        q.since = Some(Utc::now());
        assert!(!JsonStorage::event_matches(&e, &q));
    }
}

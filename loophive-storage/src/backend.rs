//! Async storage trait for LoopHive persistence.
//!
//! All CRUD, the batched event insert with silent dedup, the filtered and
//! derived queries, and the retention prune pass. Every method is scoped
//! by tenant except the global operations that are explicitly tenant-free
//! (nothing here is; pricing persistence lives with the pricing engine).
//!
//! Derived reads (`list_tasks`, `get_metrics`, pipeline, cost) take `now`
//! explicitly so they stay deterministic under test.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loophive_core::{
    AgentHourStats, AgentRecord, AgentUpsert, AlertHistoryRecord, AlertRuleCreate,
    AlertRuleRecord, AlertRuleUpdate, ApiKeyInfo, ApiKeyRecord, CostSummary, CostTimeBucket,
    Event, FleetPipelineState, LlmCallRecord, MetricsResponse, Page, PipelineState,
    ProjectAgentRecord, ProjectCreate, ProjectRecord, ProjectUpdate, TaskSummary, TenantPlan,
    TenantRecord,
};

use crate::{
    AgentQuery, CostCallsQuery, CostQuery, EventQuery, MetricsQuery, PruneStats, StorageResult,
    TaskQuery,
};

#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Load persisted state (creating empty tables as needed).
    async fn initialize(&self) -> StorageResult<()>;

    /// Flush all tables to disk.
    async fn close(&self) -> StorageResult<()>;

    // ========================================================================
    // TENANTS
    // ========================================================================

    /// Create a tenant together with its `default` project.
    async fn create_tenant(
        &self,
        tenant_id: &str,
        name: &str,
        slug: &str,
        plan: TenantPlan,
    ) -> StorageResult<TenantRecord>;

    async fn get_tenant(&self, tenant_id: &str) -> StorageResult<Option<TenantRecord>>;

    // ========================================================================
    // API KEYS
    // ========================================================================

    async fn create_api_key(&self, record: ApiKeyRecord) -> StorageResult<ApiKeyRecord>;

    /// Look up an active key by its SHA-256 hash.
    async fn authenticate(&self, key_hash: &str) -> StorageResult<Option<ApiKeyInfo>>;

    /// Update the key's `last_used_at`. Fire-and-forget on the hot path.
    async fn touch_api_key(&self, key_id: &str) -> StorageResult<()>;

    async fn list_api_keys(&self, tenant_id: &str) -> StorageResult<Vec<ApiKeyRecord>>;

    /// Soft-revoke. Returns false when the key was absent or already
    /// revoked.
    async fn revoke_api_key(&self, tenant_id: &str, key_id: &str) -> StorageResult<bool>;

    // ========================================================================
    // PROJECTS
    // ========================================================================

    async fn create_project(
        &self,
        tenant_id: &str,
        project: ProjectCreate,
    ) -> StorageResult<ProjectRecord>;

    /// Look up by project id, falling back to slug (the SDK sends slugs
    /// as `project_id`). Archived projects still match, which keeps an
    /// archived slug from ever being re-auto-created.
    async fn get_project(
        &self,
        tenant_id: &str,
        id_or_slug: &str,
    ) -> StorageResult<Option<ProjectRecord>>;

    async fn list_projects(
        &self,
        tenant_id: &str,
        include_archived: bool,
    ) -> StorageResult<Vec<ProjectRecord>>;

    async fn update_project(
        &self,
        tenant_id: &str,
        project_id: &str,
        updates: ProjectUpdate,
    ) -> StorageResult<Option<ProjectRecord>>;

    async fn set_project_archived(
        &self,
        tenant_id: &str,
        project_id: &str,
        archived: bool,
    ) -> StorageResult<bool>;

    /// Active (non-archived) project count, for the auto-create quota.
    async fn count_projects(&self, tenant_id: &str) -> StorageResult<usize>;

    async fn count_project_events(
        &self,
        tenant_id: &str,
        project_id: &str,
    ) -> StorageResult<usize>;

    /// Move all events from one project to another. Returns the number
    /// moved.
    async fn reassign_events(
        &self,
        tenant_id: &str,
        from_project_id: &str,
        to_project_id: &str,
    ) -> StorageResult<usize>;

    // ========================================================================
    // AGENTS
    // ========================================================================

    /// Atomic per-agent profile update. Records the previously derived
    /// status on the profile before applying the delta.
    async fn upsert_agent(
        &self,
        tenant_id: &str,
        agent_id: &str,
        upsert: AgentUpsert,
        now: DateTime<Utc>,
    ) -> StorageResult<AgentRecord>;

    async fn get_agent(&self, tenant_id: &str, agent_id: &str)
        -> StorageResult<Option<AgentRecord>>;

    /// Sorted by `last_seen` descending.
    async fn list_agents(
        &self,
        tenant_id: &str,
        query: AgentQuery,
    ) -> StorageResult<Vec<AgentRecord>>;

    /// Rolling one-hour rollup plus pipeline-sourced queue depth and
    /// active issues.
    async fn agent_hour_stats(
        &self,
        tenant_id: &str,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<AgentHourStats>;

    // ========================================================================
    // PROJECT-AGENT JUNCTION
    // ========================================================================

    async fn upsert_project_agent(
        &self,
        tenant_id: &str,
        project_id: &str,
        agent_id: &str,
    ) -> StorageResult<()>;

    async fn list_project_agents(
        &self,
        tenant_id: &str,
        project_id: &str,
    ) -> StorageResult<Vec<ProjectAgentRecord>>;

    async fn remove_project_agent(
        &self,
        tenant_id: &str,
        project_id: &str,
        agent_id: &str,
    ) -> StorageResult<bool>;

    // ========================================================================
    // EVENTS
    // ========================================================================

    /// Batched insert with silent dedup on `(tenant, event_id)`. Returns
    /// the number actually inserted (may be less than the batch).
    async fn insert_events(&self, events: Vec<Event>) -> StorageResult<usize>;

    /// Filtered event page, reverse chronological.
    async fn get_events(&self, tenant_id: &str, query: EventQuery) -> StorageResult<Page<Event>>;

    /// All events for one task, chronological.
    async fn get_task_events(&self, tenant_id: &str, task_id: &str) -> StorageResult<Vec<Event>>;

    // ========================================================================
    // DERIVED READS
    // ========================================================================

    async fn list_tasks(
        &self,
        tenant_id: &str,
        query: TaskQuery,
    ) -> StorageResult<Page<TaskSummary>>;

    async fn get_metrics(
        &self,
        tenant_id: &str,
        query: MetricsQuery,
        now: DateTime<Utc>,
    ) -> StorageResult<MetricsResponse>;

    async fn cost_summary(
        &self,
        tenant_id: &str,
        query: CostQuery,
        now: DateTime<Utc>,
    ) -> StorageResult<CostSummary>;

    async fn cost_calls(
        &self,
        tenant_id: &str,
        query: CostCallsQuery,
    ) -> StorageResult<Page<LlmCallRecord>>;

    async fn cost_timeseries(
        &self,
        tenant_id: &str,
        query: CostQuery,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<CostTimeBucket>>;

    async fn get_pipeline(&self, tenant_id: &str, agent_id: &str)
        -> StorageResult<PipelineState>;

    async fn get_fleet_pipeline(&self, tenant_id: &str) -> StorageResult<FleetPipelineState>;

    // ========================================================================
    // ALERT RULES & HISTORY
    // ========================================================================

    async fn create_alert_rule(
        &self,
        tenant_id: &str,
        rule: AlertRuleCreate,
    ) -> StorageResult<AlertRuleRecord>;

    async fn get_alert_rule(
        &self,
        tenant_id: &str,
        rule_id: &str,
    ) -> StorageResult<Option<AlertRuleRecord>>;

    async fn list_alert_rules(
        &self,
        tenant_id: &str,
        project_id: Option<&str>,
        is_enabled: Option<bool>,
    ) -> StorageResult<Vec<AlertRuleRecord>>;

    async fn update_alert_rule(
        &self,
        tenant_id: &str,
        rule_id: &str,
        updates: AlertRuleUpdate,
    ) -> StorageResult<Option<AlertRuleRecord>>;

    async fn delete_alert_rule(&self, tenant_id: &str, rule_id: &str) -> StorageResult<bool>;

    async fn insert_alert(&self, alert: AlertHistoryRecord) -> StorageResult<()>;

    async fn list_alert_history(
        &self,
        tenant_id: &str,
        rule_id: Option<&str>,
        project_id: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
        cursor: Option<&str>,
    ) -> StorageResult<Page<AlertHistoryRecord>>;

    async fn last_alert_for_rule(
        &self,
        tenant_id: &str,
        rule_id: &str,
    ) -> StorageResult<Option<AlertHistoryRecord>>;

    // ========================================================================
    // RETENTION
    // ========================================================================

    /// One atomic prune pass over the event table: plan-based TTL first,
    /// then cold-event retention for survivors. Persists only when
    /// something was pruned.
    async fn prune_events(&self, now: DateTime<Utc>) -> StorageResult<PruneStats>;
}

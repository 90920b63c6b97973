//! LoopHive SDK - framework-agnostic agent instrumentation.
//!
//! ```no_run
//! use loophive_sdk::{self as loophive, AgentOptions, ClientOptions, LlmCall, TaskOptions};
//!
//! let client = loophive::init(ClientOptions::new("hb_live_...")).unwrap();
//! let agent = client.agent("my-agent", AgentOptions::default());
//!
//! let result: Result<(), String> = agent.with_task(
//!     "task-123",
//!     TaskOptions::default().project("sales-pipeline"),
//!     |task| {
//!         task.llm_call(LlmCall::new("reason", "claude-sonnet-4").tokens(1200, 350));
//!         task.plan("Process lead", &["Score", "Enrich", "Route"]);
//!         task.plan_step(0, "completed", "Scored lead 42");
//!         Ok(())
//!     },
//! );
//!
//! loophive::shutdown();
//! ```
//!
//! The SDK is fail-silent by design: after `init`, no instrumentation
//! call panics or returns an error to the host application.

mod action;
mod agent;
mod config;
mod task;
mod transport;

pub use action::ActionScope;
pub use agent::{Agent, AgentOptions, LlmCall, PayloadCallback, SDK_VERSION};
pub use config::{resolve_endpoint, ClientOptions, DEFAULT_ENDPOINT};
pub use task::{Task, TaskOptions};
pub use transport::Transport;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use once_cell::sync::Lazy;
use thiserror::Error;

/// SDK misuse errors (only surfaced by `init`).
#[derive(Debug, Error)]
pub enum SdkError {
    #[error("invalid API key format: must start with 'hb_' (got '{0}...')")]
    InvalidApiKey(String),
}

/// The LoopHive client: one transport plus a registry of agents.
#[derive(Debug)]
pub struct Client {
    transport: Arc<Transport>,
    environment: String,
    group: String,
    agents: Mutex<HashMap<String, Agent>>,
}

impl Client {
    /// Build a standalone client. Most applications use [`init`] instead,
    /// which manages the process-wide singleton.
    pub fn new(options: ClientOptions) -> Self {
        let endpoint = options.endpoint.unwrap_or_else(resolve_endpoint);
        let transport = Transport::new(
            endpoint,
            options.api_key,
            options.flush_interval,
            options.batch_size,
            options.max_queue_size,
        );
        Self {
            transport,
            environment: options.environment,
            group: options.group,
            agents: Mutex::new(HashMap::new()),
        }
    }

    /// Create or retrieve an agent. Idempotent: the same `agent_id`
    /// returns the existing instance (options of later calls are
    /// ignored with a warning).
    pub fn agent(&self, agent_id: &str, options: AgentOptions) -> Agent {
        let mut agents = match self.agents.lock() {
            Ok(agents) => agents,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = agents.get(agent_id) {
            tracing::warn!(agent_id, "agent() called again, returning existing instance");
            return existing.clone();
        }
        let agent = Agent::new(
            agent_id,
            self.transport.clone(),
            &self.environment,
            &self.group,
            options,
        );
        agents.insert(agent_id.to_string(), agent.clone());
        agent
    }

    /// Look up a registered agent by id.
    pub fn get_agent(&self, agent_id: &str) -> Option<Agent> {
        match self.agents.lock() {
            Ok(agents) => agents.get(agent_id).cloned(),
            Err(poisoned) => poisoned.into_inner().get(agent_id).cloned(),
        }
    }

    /// Trigger an immediate flush of all queued events.
    pub fn flush(&self) {
        self.transport.flush();
    }

    /// Stop all heartbeats and drain the transport.
    pub fn shutdown(&self, timeout: Duration) {
        let agents: Vec<Agent> = match self.agents.lock() {
            Ok(agents) => agents.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        };
        for agent in agents {
            agent.stop_heartbeat();
        }
        self.transport.shutdown(timeout);
    }
}

// Process-wide singleton, installed by `init` and cleared by `reset`.
static INSTANCE: Lazy<Mutex<Option<Arc<Client>>>> = Lazy::new(|| Mutex::new(None));

/// Initialize the SDK singleton. Validates that the API key starts with
/// `hb_`. Subsequent calls log a warning and return the existing
/// instance.
pub fn init(options: ClientOptions) -> Result<Arc<Client>, SdkError> {
    if !options.api_key.starts_with("hb_") {
        let prefix: String = options.api_key.chars().take(10).collect();
        return Err(SdkError::InvalidApiKey(prefix));
    }

    let mut instance = match INSTANCE.lock() {
        Ok(instance) => instance,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(existing) = instance.as_ref() {
        tracing::warn!("init() called again, returning existing instance; call reset() first");
        return Ok(existing.clone());
    }
    let client = Arc::new(Client::new(options));
    *instance = Some(client.clone());
    Ok(client)
}

/// Shut down the singleton with the default 5 second timeout.
pub fn shutdown() {
    shutdown_with_timeout(Duration::from_secs(5));
}

/// Shut down the singleton, draining remaining events.
pub fn shutdown_with_timeout(timeout: Duration) {
    let instance = match INSTANCE.lock() {
        Ok(instance) => instance,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(client) = instance.as_ref() {
        client.shutdown(timeout);
    }
}

/// Shut down and clear the singleton, allowing re-initialization. Test
/// hook.
pub fn reset() {
    let mut instance = match INSTANCE.lock() {
        Ok(instance) => instance,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(client) = instance.take() {
        client.shutdown(Duration::from_secs(5));
    }
}

/// Flush all queued events immediately.
pub fn flush() {
    let instance = match INSTANCE.lock() {
        Ok(instance) => instance,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(client) = instance.as_ref() {
        client.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_rejects_bad_key_prefix() {
        let err = init(ClientOptions::new("sk-not-a-loophive-key")).unwrap_err();
        assert!(matches!(err, SdkError::InvalidApiKey(_)));
    }
}

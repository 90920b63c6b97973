//! Client configuration: endpoint resolution and init options.
//!
//! Endpoint search order: `./loophive.cfg`, then `~/.loophive/loophive.cfg`,
//! then the compiled-in default. The config file is a minimal INI with a
//! `[loophive]` section and an `endpoint` key.

use std::path::Path;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://mlbackend.net/loophive";

/// Options accepted by [`crate::init`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_key: String,
    /// Overrides config-file resolution when set.
    pub endpoint: Option<String>,
    pub environment: String,
    pub group: String,
    pub flush_interval: Duration,
    pub batch_size: usize,
    pub max_queue_size: usize,
}

impl ClientOptions {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: None,
            environment: "production".to_string(),
            group: "default".to_string(),
            flush_interval: Duration::from_secs(5),
            batch_size: 100,
            max_queue_size: 10_000,
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }
}

/// Resolve the backend endpoint from config files or the default.
pub fn resolve_endpoint() -> String {
    let mut candidates = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("loophive.cfg"));
    }
    if let Some(home) = std::env::var_os("HOME") {
        candidates.push(Path::new(&home).join(".loophive").join("loophive.cfg"));
    }

    for path in candidates {
        if let Ok(contents) = std::fs::read_to_string(&path) {
            if let Some(endpoint) = parse_endpoint(&contents) {
                tracing::debug!(path = %path.display(), endpoint, "Endpoint resolved from config");
                return endpoint;
            }
        }
    }
    DEFAULT_ENDPOINT.to_string()
}

/// Extract `[loophive] endpoint = ...` from INI-style contents.
fn parse_endpoint(contents: &str) -> Option<String> {
    let mut in_section = false;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_section = section.trim() == "loophive";
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "endpoint" {
                let value = value.trim().trim_matches('"').trim_end_matches('/');
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

//! Server configuration, loaded from environment variables with defaults
//! suitable for development.

use std::time::Duration;

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the HTTP listener.
    pub bind_addr: String,

    /// Directory for the JSON table files and the pricing file.
    pub data_dir: String,

    /// How often the retention engine runs (it also runs once at startup).
    pub retention_interval: Duration,

    /// Liveness ping interval for WebSocket connections.
    pub ws_ping_interval: Duration,

    /// When set, bootstrap a development tenant whose API key is this
    /// value (must start with `hb_`).
    pub dev_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            data_dir: "data".to_string(),
            retention_interval: Duration::from_secs(15 * 60),
            ws_ping_interval: Duration::from_secs(30),
            dev_key: None,
        }
    }
}

impl ServerConfig {
    /// Environment variables:
    /// - `HIVEBOARD_BIND`: listener address (default: 127.0.0.1:8000)
    /// - `HIVEBOARD_DATA`: data directory (default: ./data)
    /// - `HIVEBOARD_RETENTION_INTERVAL_SECS`: prune cadence (default: 900)
    /// - `HIVEBOARD_WS_PING_INTERVAL_SECS`: WS ping cadence (default: 30)
    /// - `HIVEBOARD_DEV_KEY`: dev-tenant bootstrap key (optional)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("HIVEBOARD_BIND").unwrap_or(defaults.bind_addr),
            data_dir: std::env::var("HIVEBOARD_DATA").unwrap_or(defaults.data_dir),
            retention_interval: std::env::var("HIVEBOARD_RETENTION_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention_interval),
            ws_ping_interval: std::env::var("HIVEBOARD_WS_PING_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.ws_ping_interval),
            dev_key: std::env::var("HIVEBOARD_DEV_KEY").ok().filter(|k| !k.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:8000");
        assert_eq!(config.retention_interval, Duration::from_secs(900));
        assert_eq!(config.ws_ping_interval, Duration::from_secs(30));
        assert!(config.dev_key.is_none());
    }
}

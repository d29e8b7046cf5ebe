//! WolfElect Configuration
//!
//! Configuration structures for the WolfElect leader election gate.
//! Values come from an optional TOML file with environment variable
//! overrides applied on top, so containerized deployments can run with
//! nothing but `ZK_HOST`/`ZK_PORT`/`PORT` set.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main WolfElect configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WolfElectConfig {
    /// Coordination service connection configuration
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Election behavior configuration
    #[serde(default)]
    pub election: ElectionConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Coordination service (ZooKeeper) connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// ZooKeeper host
    #[serde(default = "default_zk_host")]
    pub host: String,

    /// ZooKeeper client port
    #[serde(default = "default_zk_port")]
    pub port: u16,

    /// Reachability probe timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Requested session timeout in milliseconds (the server may negotiate
    /// it down)
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
}

/// Election behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Parent path the candidate nodes live under
    #[serde(default = "default_election_path")]
    pub path: String,

    /// Re-evaluation interval while waiting to become leader, in seconds
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    /// Optional jitter added to the retry interval, in milliseconds
    #[serde(default)]
    pub retry_jitter_ms: u64,

    /// Grace period for shutdown cleanup, in seconds
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable the HTTP endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_zk_host() -> String {
    "zookeeper-headless".to_string()
}

fn default_zk_port() -> u16 {
    2181
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_session_timeout_ms() -> u64 {
    10_000
}

fn default_election_path() -> String {
    "/api-leader".to_string()
}

fn default_retry_interval() -> u64 {
    5
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: default_zk_host(),
            port: default_zk_port(),
            connect_timeout_secs: default_connect_timeout(),
            session_timeout_ms: default_session_timeout_ms(),
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            path: default_election_path(),
            retry_interval_secs: default_retry_interval(),
            retry_jitter_ms: 0,
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfElectConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: WolfElectConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (no environment overrides)
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfElectConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from defaults and environment variables only
    pub fn from_env() -> crate::Result<Self> {
        let mut config = WolfElectConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply the deployment environment contract on top of whatever the
    /// file provided: ZK_HOST, ZK_PORT, ELECTION_PATH, PORT,
    /// CONNECT_TIMEOUT_SECS, RETRY_INTERVAL_SECS
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(host) = get("ZK_HOST") {
            if !host.is_empty() {
                self.coordinator.host = host;
            }
        }
        if let Some(port) = get("ZK_PORT") {
            if let Ok(port) = port.parse() {
                self.coordinator.port = port;
            }
        }
        if let Some(path) = get("ELECTION_PATH") {
            if !path.is_empty() {
                self.election.path = path;
            }
        }
        if let Some(port) = get("PORT") {
            if let Ok(port) = port.parse::<u16>() {
                let host = self
                    .api
                    .bind_address
                    .rsplit_once(':')
                    .map(|(h, _)| h.to_string())
                    .unwrap_or_else(|| "0.0.0.0".to_string());
                self.api.bind_address = format!("{}:{}", host, port);
            }
        }
        if let Some(secs) = get("CONNECT_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                self.coordinator.connect_timeout_secs = secs;
            }
        }
        if let Some(secs) = get("RETRY_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse() {
                self.election.retry_interval_secs = secs;
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.coordinator.host.is_empty() {
            return Err(crate::Error::Config("coordinator.host cannot be empty".into()));
        }

        if !self.election.path.starts_with('/') || self.election.path.len() < 2 {
            return Err(crate::Error::Config(
                "election.path must be an absolute path".into(),
            ));
        }

        if self.election.path.ends_with('/') {
            return Err(crate::Error::Config(
                "election.path must not end with '/'".into(),
            ));
        }

        if self.coordinator.connect_timeout_secs == 0 {
            return Err(crate::Error::Config(
                "coordinator.connect_timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Coordination service address (host:port)
    pub fn coordinator_address(&self) -> String {
        format!("{}:{}", self.coordinator.host, self.coordinator.port)
    }

    /// Reachability probe timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.coordinator.connect_timeout_secs)
    }

    /// Requested session timeout as Duration
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.coordinator.session_timeout_ms)
    }

    /// Follower re-evaluation interval as Duration
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.election.retry_interval_secs)
    }

    /// Shutdown cleanup grace period as Duration
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.election.shutdown_grace_secs)
    }
}

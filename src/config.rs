//! Configuration management for Tollgate.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterMode;

/// Main configuration for a Tollgate instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Flow rule source
    #[serde(default)]
    pub rules: RulesConfig,

    /// Cluster flow control settings
    #[serde(default)]
    pub cluster: ClusterSettings,

    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where flow rules are loaded from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Path to a YAML or JSON flow rule file
    pub path: Option<String>,
}

/// Cluster flow control settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Role of this instance in the cluster
    #[serde(default)]
    pub mode: ClusterMode,

    /// Embedded token server settings, used in server mode
    #[serde(default)]
    pub server: TokenServerConfig,
}

/// Embedded token server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenServerConfig {
    /// Maximum token requests per window the server accepts across all rules
    #[serde(default = "default_max_allowed_qps")]
    pub max_allowed_qps: f64,

    /// Longest wait a prioritized request may be asked to take
    #[serde(default = "default_max_occupy_wait_ms")]
    pub max_occupy_wait_ms: u64,

    /// Number of clients sharing an average-local threshold
    #[serde(default = "default_connected_clients")]
    pub connected_clients: u32,

    /// Statistic window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for TokenServerConfig {
    fn default() -> Self {
        Self {
            max_allowed_qps: default_max_allowed_qps(),
            max_occupy_wait_ms: default_max_occupy_wait_ms(),
            connected_clients: default_connected_clients(),
            window_ms: default_window_ms(),
        }
    }
}

fn default_max_allowed_qps() -> f64 {
    30_000.0
}

fn default_max_occupy_wait_ms() -> u64 {
    500
}

fn default_connected_clients() -> u32 {
    1
}

fn default_window_ms() -> u64 {
    1000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TollgateConfig {
    /// Load configuration from a file, overlaid with `TOLLGATE__*` environment variables.
    ///
    /// `TOLLGATE__CLUSTER__MODE=server` overrides `cluster.mode`, and so on.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(crate::error::TollgateError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let config = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix("TOLLGATE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> crate::error::Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| crate::error::TollgateError::Config(e.to_string()))
    }
}

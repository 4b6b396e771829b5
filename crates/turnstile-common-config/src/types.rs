//! Configuration types.

use serde::{Deserialize, Serialize};

/// Root configuration for a Turnstile server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Gated listeners, one admission gate each.
    pub listeners: Vec<ListenerConfig>,
    /// Metrics endpoint; disabled when absent.
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Shutdown configuration.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// One listening port and its connection ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Listener name, used as a metric label and in logs.
    pub name: String,
    /// Socket address to bind, e.g. `0.0.0.0:8080`.
    pub bind: String,
    /// Maximum simultaneously open connections. Unbounded when absent.
    ///
    /// Signed so that negative values in a file are reported as invalid
    /// instead of failing to parse.
    #[serde(default)]
    pub max_connections: Option<i64>,
    /// What admitted connections are handed to.
    #[serde(default)]
    pub handler: HandlerKind,
    /// Minimum interval between two "connections dropped" warnings.
    #[serde(default = "default_rejection_log_interval")]
    pub rejection_log_interval_ms: u64,
}

fn default_rejection_log_interval() -> u64 {
    1000
}

/// Connection handler selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// Write back everything that is read.
    #[default]
    Echo,
    /// Read and throw away everything.
    Discard,
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Socket address for the metrics endpoint.
    pub bind: String,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (pretty, compact or json).
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Optional log file, appended to.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long to wait for open connections to drain.
    #[serde(default = "default_shutdown_timeout")]
    pub timeout_secs: u64,
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout(),
        }
    }
}

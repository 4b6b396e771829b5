//! Configuration file loading and parsing.

use crate::env::{vars, EnvError, Environment};
use crate::types::TurnstileConfig;
use regex::Regex;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

/// Config loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed to read config: {source}")]
    ReadError {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid YAML at line {}: {message}", line.map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    ParseError { line: Option<usize>, message: String },

    #[error("validation error: {message}")]
    ValidationError { message: String },

    #[error("environment variable not found: {var}")]
    EnvVarNotFound { var: String },

    #[error(transparent)]
    Env(#[from] EnvError),
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        ConfigError::ValidationError {
            message: message.into(),
        }
    }
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("environment pattern is a valid regex")
    })
}

/// Configuration loader.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the file named by `TURNSTILE_CONFIG_PATH`.
    pub fn from_env() -> Result<TurnstileConfig, ConfigError> {
        let path = Environment::require(vars::CONFIG_PATH)?;
        Self::from_path(path)
    }

    /// Load and validate a YAML configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<TurnstileConfig, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate YAML configuration text.
    ///
    /// `${VAR}` and `${VAR:-default}` are expanded before parsing, and
    /// environment overrides are applied before validation.
    pub fn parse(contents: &str) -> Result<TurnstileConfig, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        let mut config: TurnstileConfig =
            serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError {
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;

        apply_env_overrides(&mut config)?;
        validate(&config)?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save(config: &TurnstileConfig, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(config).map_err(|e| ConfigError::ParseError {
            line: None,
            message: e.to_string(),
        })?;

        std::fs::write(path, yaml)?;
        Ok(())
    }
}

/// Expand environment variables in the form `${VAR}` or `${VAR:-default}`.
fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(content.len());
    let mut last = 0;

    for cap in env_pattern().captures_iter(content) {
        let Some(whole) = cap.get(0) else { continue };
        let var_name = &cap[1];
        let default = cap.get(2).map(|m| m.as_str());

        let value = match std::env::var(var_name) {
            Ok(v) => v,
            Err(_) => match default {
                Some(d) => d.to_string(),
                None => {
                    return Err(ConfigError::EnvVarNotFound {
                        var: var_name.to_string(),
                    })
                }
            },
        };

        result.push_str(&content[last..whole.start()]);
        result.push_str(&value);
        last = whole.end();
    }

    result.push_str(&content[last..]);
    Ok(result)
}

fn apply_env_overrides(config: &mut TurnstileConfig) -> Result<(), ConfigError> {
    if let Some(secs) = Environment::get_int::<u64>(vars::SHUTDOWN_TIMEOUT_SECS)? {
        config.shutdown.timeout_secs = secs;
    }
    Ok(())
}

/// Validate configuration values.
fn validate(config: &TurnstileConfig) -> Result<(), ConfigError> {
    if config.listeners.is_empty() {
        return Err(ConfigError::invalid("at least one listener must be configured"));
    }

    let mut names = HashSet::new();
    let mut binds = HashSet::new();

    for listener in &config.listeners {
        if listener.name.trim().is_empty() {
            return Err(ConfigError::invalid("listener name must not be empty"));
        }

        if !names.insert(listener.name.as_str()) {
            return Err(ConfigError::invalid(format!(
                "duplicate listener name: {}",
                listener.name
            )));
        }

        let addr: SocketAddr = listener.bind.parse().map_err(|_| {
            ConfigError::invalid(format!(
                "listener {}: invalid bind address {:?}",
                listener.name, listener.bind
            ))
        })?;

        // Port 0 asks the OS for a free port, so it never collides.
        if addr.port() != 0 && !binds.insert(addr) {
            return Err(ConfigError::invalid(format!(
                "listener {}: bind address {} is already used by another listener",
                listener.name, addr
            )));
        }

        if let Some(max) = listener.max_connections {
            if max <= 0 {
                return Err(ConfigError::invalid(format!(
                    "listener {}: max_connections must be a positive integer, got {}",
                    listener.name, max
                )));
            }
        }
    }

    if let Some(metrics) = &config.metrics {
        metrics.bind.parse::<SocketAddr>().map_err(|_| {
            ConfigError::invalid(format!("metrics: invalid bind address {:?}", metrics.bind))
        })?;
    }

    if config.shutdown.timeout_secs == 0 {
        return Err(ConfigError::invalid("shutdown.timeout_secs must be greater than 0"));
    }

    Ok(())
}

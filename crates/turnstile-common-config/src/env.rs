//! Environment variable handling.

use std::env;
use thiserror::Error;

/// Environment variable errors.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("required environment variable not set: {var}")]
    NotSet { var: String },

    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Environment variable names.
pub mod vars {
    pub const CONFIG_PATH: &str = "TURNSTILE_CONFIG_PATH";
    pub const SHUTDOWN_TIMEOUT_SECS: &str = "TURNSTILE_SHUTDOWN_TIMEOUT_SECS";
    pub const DEPLOY_ENV: &str = "TURNSTILE_ENV";
}

/// Environment access.
pub struct Environment {
    _guard: (),
}

impl Environment {
    /// Initialize environment from .env files.
    ///
    /// Missing files are not an error. A variable that is already set keeps
    /// its value, so the process environment wins over every file.
    pub fn init() -> Self {
        let _ = dotenvy::from_filename(".env");
        let _ = dotenvy::from_filename(".env.local");

        if let Ok(deploy) = env::var(vars::DEPLOY_ENV) {
            let _ = dotenvy::from_filename(format!(".env.{}", deploy));
        }

        Self { _guard: () }
    }

    /// Get a required string variable.
    pub fn require(var: &str) -> Result<String, EnvError> {
        env::var(var).map_err(|_| EnvError::NotSet { var: var.to_string() })
    }

    /// Get an optional string variable.
    pub fn get(var: &str) -> Option<String> {
        env::var(var).ok()
    }

    /// Get an integer variable.
    pub fn get_int<T: std::str::FromStr>(var: &str) -> Result<Option<T>, EnvError> {
        match env::var(var) {
            Ok(v) => v.trim().parse().map(Some).map_err(|_| EnvError::InvalidValue {
                var: var.to_string(),
                message: format!("expected integer, got {:?}", v),
            }),
            Err(_) => Ok(None),
        }
    }
}

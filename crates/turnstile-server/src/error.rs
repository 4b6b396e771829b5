//! Server errors.

use std::io;
use thiserror::Error;
use turnstile_gate::GateError;

/// Errors raised while starting the server.
///
/// Everything after startup is logged rather than returned: a failing
/// connection never takes the server down.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A listener's connection ceiling is invalid.
    #[error("listener '{listener}': {source}")]
    Gate {
        listener: String,
        #[source]
        source: GateError,
    },

    /// A listener could not bind its address.
    #[error("listener '{listener}' failed to bind {addr}: {source}")]
    Bind {
        listener: String,
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The metrics endpoint could not bind its address.
    #[error("metrics endpoint failed to bind {addr}: {source}")]
    MetricsBind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Result type for server startup.
pub type ServerResult<T> = Result<T, ServerError>;

//! Gate errors.

use thiserror::Error;

/// Errors raised while building an [`AdmissionGate`](crate::AdmissionGate).
///
/// Admission itself never fails: a rejected connection is a normal
/// outcome, reported as [`Admission::Rejected`](crate::Admission::Rejected)
/// or `None` from [`try_admit`](crate::AdmissionGate::try_admit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GateError {
    /// The connection ceiling is not a positive integer representable as `usize`.
    #[error("invalid configuration: max_connections must be a positive integer no larger than {}, got {value}", usize::MAX)]
    InvalidConfiguration {
        /// The rejected value.
        value: i128,
    },
}

/// Result alias for gate construction.
pub type GateResult<T> = Result<T, GateError>;

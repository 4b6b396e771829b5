//! Connection admission control.
//!
//! An [`AdmissionGate`] bounds how many connections may be open at once on
//! one listening endpoint. Each newly established connection is offered to
//! the gate exactly once: it is either admitted, receiving a
//! [`ConnectionPermit`] that gives its slot back when dropped, or rejected
//! and closed immediately. Nothing is queued and nothing waits.
//!
//! ```rust
//! use turnstile_gate::{Admission, AdmissionGate};
//!
//! let gate = AdmissionGate::new(1).unwrap();
//!
//! let first = gate.admit(());
//! assert!(first.is_admitted());
//! assert!(matches!(gate.admit(()), Admission::Rejected));
//!
//! drop(first);
//! assert_eq!(gate.num_connections(), 0);
//! ```
//!
//! Counts are reported to a [`MetricSink`]; [`PortMetric`] records them per
//! listening port into a shared
//! [`MetricsRegistry`](turnstile_common_metrics::MetricsRegistry).

mod error;
mod gate;
mod listener;
mod metric;
mod permit;
mod report;
mod stream;

pub use error::{GateError, GateResult};
pub use gate::{Admission, AdmissionGate, GateBuilder, GateSnapshot, SlotState};
pub use listener::GatedListener;
pub use metric::{MetricSink, NoopSink, PortMetric, PortStats};
pub use permit::ConnectionPermit;
pub use stream::GatedStream;

//! The admission gate.

use crate::error::{GateError, GateResult};
use crate::metric::{MetricSink, NoopSink};
use crate::permit::ConnectionPermit;
use crate::report::RejectionReporter;
use crate::stream::GatedStream;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_LABEL: &str = "default";
const DEFAULT_REJECTION_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Connection count and ceiling at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateSnapshot {
    /// Connections counted as open.
    pub current: usize,
    /// The gate's ceiling.
    pub max: usize,
}

/// State of one connection attempt after the gate has decided on it.
///
/// The decision is made once, inside [`AdmissionGate::try_admit`], so an
/// attempt is never observed undecided. `Admitted` becomes `Closed` when
/// its permit is released. `Rejected` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Counted against the ceiling and still open.
    Admitted,
    /// Over the ceiling; closed without being counted.
    Rejected,
    /// Admitted earlier and since released.
    Closed,
}

/// Outcome of [`AdmissionGate::admit`].
#[derive(Debug)]
pub enum Admission<S> {
    /// The stream may be used; it releases its slot when dropped.
    Admitted(GatedStream<S>),
    /// The stream was over the ceiling and has already been closed.
    Rejected,
}

impl<S> Admission<S> {
    /// Whether the connection was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }

    /// State of the connection right now.
    pub fn state(&self) -> SlotState {
        match self {
            Admission::Admitted(stream) => stream.permit().state(),
            Admission::Rejected => SlotState::Rejected,
        }
    }

    /// The admitted stream, if any.
    pub fn into_stream(self) -> Option<GatedStream<S>> {
        match self {
            Admission::Admitted(stream) => Some(stream),
            Admission::Rejected => None,
        }
    }
}

pub(crate) struct GateInner {
    max: usize,
    current: AtomicUsize,
    label: String,
    sink: Arc<dyn MetricSink>,
    reporter: RejectionReporter,
}

impl GateInner {
    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    /// Give back one counted slot. Only called by a permit, at most once.
    pub(crate) fn release(&self) {
        let previous = self.current.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "released more slots than were admitted");

        let snapshot = GateSnapshot {
            current: previous - 1,
            max: self.max,
        };
        debug!(
            listener = %self.label,
            current = snapshot.current,
            max = snapshot.max,
            "connection released"
        );
        self.sink.connection_closed(snapshot);
    }
}

/// Bounds the number of simultaneously open connections on one listener.
///
/// Cloning is cheap and every clone shares the same counter. Construct one
/// gate per listener and hand it to the accept path.
///
/// # Examples
///
/// ```rust
/// use turnstile_gate::AdmissionGate;
///
/// let gate = AdmissionGate::new(1).unwrap();
///
/// let first = gate.try_admit().expect("below the ceiling");
/// assert_eq!(gate.num_connections(), 1);
///
/// assert!(gate.try_admit().is_none());
/// assert_eq!(gate.num_connections(), 1);
///
/// drop(first);
/// assert_eq!(gate.num_connections(), 0);
/// ```
#[derive(Clone)]
pub struct AdmissionGate {
    inner: Arc<GateInner>,
}

impl AdmissionGate {
    /// Create a gate admitting at most `max_connections` open connections.
    ///
    /// Fails with [`GateError::InvalidConfiguration`] when `max_connections`
    /// is zero.
    pub fn new(max_connections: usize) -> GateResult<Self> {
        Self::builder(max_connections).build()
    }

    /// Create a gate from a signed ceiling, as found in configuration files.
    ///
    /// Zero, negative values and values larger than `usize::MAX` are
    /// rejected, never clamped.
    pub fn from_signed(max_connections: i64) -> GateResult<Self> {
        GateBuilder::signed(max_connections).build()
    }

    /// Create a gate whose ceiling is `usize::MAX`.
    pub fn unbounded() -> Self {
        Self::from_inner(usize::MAX, GateBuilder::new(usize::MAX as i128))
    }

    /// Start building a gate with the given ceiling.
    pub fn builder(max_connections: usize) -> GateBuilder {
        GateBuilder::new(max_connections as i128)
    }

    fn from_inner(max: usize, builder: GateBuilder) -> Self {
        let inner = Arc::new(GateInner {
            max,
            current: AtomicUsize::new(0),
            reporter: RejectionReporter::new(
                builder.label.clone(),
                max,
                builder.rejection_log_interval,
            ),
            label: builder.label,
            sink: builder.sink,
        });
        inner.sink.gate_attached(GateSnapshot { current: 0, max });
        Self { inner }
    }

    /// Decide whether one newly established connection may proceed.
    ///
    /// The counter is incremented first; if the slot number obtained is
    /// above the ceiling the increment is undone and `None` is returned.
    /// Concurrent callers racing at the ceiling are therefore decided by
    /// their own slot number alone, without a lock, and no more than
    /// `max_connections` attempts are ever admitted at once.
    ///
    /// Never blocks and never fails: rejection is a normal outcome. The
    /// caller must close a rejected connection without exchanging data.
    pub fn try_admit(&self) -> Option<ConnectionPermit> {
        let inner = &self.inner;
        let previous = inner.current.fetch_add(1, Ordering::AcqRel);

        if previous >= inner.max {
            let current = inner.current.fetch_sub(1, Ordering::AcqRel) - 1;
            let snapshot = GateSnapshot {
                current,
                max: inner.max,
            };
            inner.reporter.record(snapshot);
            inner.sink.connection_rejected(snapshot);
            return None;
        }

        let snapshot = GateSnapshot {
            current: previous + 1,
            max: inner.max,
        };
        debug!(
            listener = %inner.label,
            current = snapshot.current,
            max = snapshot.max,
            "connection admitted"
        );
        inner.sink.connection_opened(snapshot);
        Some(ConnectionPermit::new(Arc::clone(inner)))
    }

    /// Admit `stream` or close it.
    ///
    /// A rejected stream is dropped before this returns, which closes it.
    pub fn admit<S>(&self, stream: S) -> Admission<S> {
        match self.try_admit() {
            Some(permit) => Admission::Admitted(GatedStream::new(stream, permit)),
            None => {
                drop(stream);
                Admission::Rejected
            }
        }
    }

    /// Connections counted as open right now.
    ///
    /// A best-effort snapshot: it may be stale by the time it is used, and
    /// may briefly read one above the ceiling while a rejected attempt is
    /// being rolled back.
    pub fn num_connections(&self) -> usize {
        self.inner.current.load(Ordering::Acquire)
    }

    /// The ceiling fixed at construction.
    pub fn max_connections(&self) -> usize {
        self.inner.max
    }

    /// Lifetime number of rejected attempts.
    pub fn num_rejected(&self) -> u64 {
        self.inner.reporter.total()
    }

    /// Current count and ceiling.
    pub fn snapshot(&self) -> GateSnapshot {
        GateSnapshot {
            current: self.num_connections(),
            max: self.max_connections(),
        }
    }

    /// Name used in logs, usually the listener name.
    pub fn label(&self) -> &str {
        &self.inner.label
    }
}

impl fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("label", &self.inner.label)
            .field("current", &self.num_connections())
            .field("max", &self.inner.max)
            .finish()
    }
}

/// Builder for [`AdmissionGate`].
pub struct GateBuilder {
    max: i128,
    label: String,
    sink: Arc<dyn MetricSink>,
    rejection_log_interval: Duration,
}

impl GateBuilder {
    fn new(max: i128) -> Self {
        Self {
            max,
            label: DEFAULT_LABEL.to_string(),
            sink: Arc::new(NoopSink),
            rejection_log_interval: DEFAULT_REJECTION_LOG_INTERVAL,
        }
    }

    /// Start from a signed ceiling.
    pub fn signed(max_connections: i64) -> Self {
        Self::new(i128::from(max_connections))
    }

    /// Name used in logs.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Sink receiving count updates.
    pub fn metric_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Minimum interval between two "connections dropped" warnings.
    pub fn rejection_log_interval(mut self, interval: Duration) -> Self {
        self.rejection_log_interval = interval;
        self
    }

    /// Check the ceiling without building anything.
    ///
    /// Lets a caller fail before acquiring resources that the gate would
    /// be attached to, such as a bound socket or registered metrics.
    pub fn validate(&self) -> GateResult<()> {
        validate_ceiling(self.max).map(|_| ())
    }

    /// Validate the ceiling and build the gate.
    pub fn build(self) -> GateResult<AdmissionGate> {
        let max = validate_ceiling(self.max)?;
        Ok(AdmissionGate::from_inner(max, self))
    }
}

fn validate_ceiling(value: i128) -> GateResult<usize> {
    match usize::try_from(value) {
        Ok(max) if max > 0 => Ok(max),
        _ => Err(GateError::InvalidConfiguration { value }),
    }
}

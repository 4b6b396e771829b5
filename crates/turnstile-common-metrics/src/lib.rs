//! Metrics collection for Turnstile.
//!
//! This crate provides counters and gauges with label support and
//! Prometheus-compatible text export. There is no global registry: the
//! server creates a [`MetricsRegistry`] and hands it to whatever needs to
//! record, usually wrapped in an `Arc`.
//!
//! # Examples
//!
//! ## Basic Usage
//!
//! ```rust
//! use turnstile_common_metrics::{labels, MetricsRegistry};
//!
//! let registry = MetricsRegistry::new();
//! let port = labels([("listener", "public"), ("port", "8080")]);
//!
//! let opened = registry.counter("connections_opened_total", port.clone());
//! let active = registry.gauge("active_connections", port);
//!
//! opened.inc();
//! active.inc();
//! assert_eq!(active.get(), 1);
//! ```
//!
//! ## Prometheus Export
//!
//! ```rust
//! use turnstile_common_metrics::{labels, MetricsRegistry};
//!
//! let registry = MetricsRegistry::new();
//! registry.describe("test_counter", "A counter used in docs");
//! registry.counter("test_counter", labels([])).inc_by(5);
//!
//! let prometheus_output = registry.export_prometheus();
//! assert!(prometheus_output.contains("test_counter 5"));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// A label set for metrics, kept sorted so exports are stable.
pub type Labels = BTreeMap<String, String>;

/// Create labels from key-value pairs.
pub fn labels<const N: usize>(pairs: [(&str, &str); N]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Counter,
    Gauge,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::Counter => "counter",
            Kind::Gauge => "gauge",
        }
    }
}

type SeriesKey = (String, Labels);

/// Metrics registry.
///
/// Series are identified by name plus label set. Asking twice for the same
/// series returns handles that share one value.
#[derive(Default)]
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<SeriesKey, Counter>>,
    gauges: RwLock<BTreeMap<SeriesKey, Gauge>>,
    help: RwLock<HashMap<String, String>>,
}

impl MetricsRegistry {
    /// Create a new registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a `# HELP` line to a metric family.
    pub fn describe(&self, name: &str, help: &str) {
        self.help
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), help.to_string());
    }

    /// Get or create a counter.
    pub fn counter(&self, name: &str, labels: Labels) -> Counter {
        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        counters
            .entry((name.to_string(), labels))
            .or_insert_with(Counter::new)
            .clone()
    }

    /// Get or create a gauge.
    pub fn gauge(&self, name: &str, labels: Labels) -> Gauge {
        let mut gauges = self.gauges.write().unwrap_or_else(PoisonError::into_inner);
        gauges
            .entry((name.to_string(), labels))
            .or_insert_with(Gauge::new)
            .clone()
    }

    /// Number of registered series across all families.
    pub fn len(&self) -> usize {
        self.counters.read().unwrap_or_else(PoisonError::into_inner).len()
            + self.gauges.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Export metrics in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        let help = self.help.read().unwrap_or_else(PoisonError::into_inner);
        let mut output = String::new();

        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        let series = counters.iter().map(|(key, c)| (key, c.get()));
        render_family(&mut output, &help, Kind::Counter, series);

        let gauges = self.gauges.read().unwrap_or_else(PoisonError::into_inner);
        let series = gauges.iter().map(|(key, g)| (key, g.get()));
        render_family(&mut output, &help, Kind::Gauge, series);

        output
    }
}

fn render_family<'a>(
    output: &mut String,
    help: &HashMap<String, String>,
    kind: Kind,
    series: impl Iterator<Item = (&'a SeriesKey, u64)>,
) {
    // BTreeMap iteration groups every series of a family together.
    let mut current: Option<&str> = None;
    for ((name, labels), value) in series {
        if current != Some(name.as_str()) {
            if let Some(text) = help.get(name) {
                let _ = writeln!(output, "# HELP {} {}", name, text);
            }
            let _ = writeln!(output, "# TYPE {} {}", name, kind.as_str());
            current = Some(name.as_str());
        }
        let _ = writeln!(output, "{}{} {}", name, format_labels(labels), value);
    }
}

/// Format labels the way Prometheus expects them: `{k="v",...}`.
fn format_labels(labels: &Labels) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let formatted = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect::<Vec<_>>()
        .join(",");

    format!("{{{}}}", formatted)
}

fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// A counter metric (monotonically increasing).
#[derive(Clone, Debug, Default)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    /// Create a new counter, not attached to any registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by a value.
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up and down).
#[derive(Clone, Debug, Default)]
pub struct Gauge {
    value: Arc<AtomicU64>,
}

impl Gauge {
    /// Create a new gauge, not attached to any registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value.
    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    /// Raise the value to `v` if it is currently lower.
    pub fn set_max(&self, v: u64) {
        self.value.fetch_max(v, Ordering::Relaxed);
    }

    /// Increment by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by 1, saturating at zero.
    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// Get the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Metric names recorded for every gated listener.
pub mod names {
    pub const ACTIVE_CONNECTIONS: &str = "turnstile_active_connections";
    pub const MAX_CONNECTIONS: &str = "turnstile_max_connections";
    pub const PEAK_CONNECTIONS: &str = "turnstile_peak_connections";
    pub const CONNECTIONS_OPENED: &str = "turnstile_connections_opened_total";
    pub const CONNECTIONS_CLOSED: &str = "turnstile_connections_closed_total";
    pub const CONNECTIONS_REJECTED: &str = "turnstile_connections_rejected_total";
}

//! Per-port metric sinks.
//!
//! The gate pushes a [`GateSnapshot`] to its sink after every admission,
//! release and rejection. Sinks are write-only from the gate's side: nothing
//! they do feeds back into an admission decision.

use crate::GateSnapshot;
use serde::Serialize;
use tokio::sync::watch;
use turnstile_common_metrics::{labels, names, Counter, Gauge, MetricsRegistry};

/// Receives connection count updates from an [`AdmissionGate`](crate::AdmissionGate).
///
/// Called on the accept path, so implementations must not block.
#[cfg_attr(test, mockall::automock)]
pub trait MetricSink: Send + Sync + 'static {
    /// The sink was attached to a gate; `snapshot.max` is the gate's ceiling.
    fn gate_attached(&self, snapshot: GateSnapshot) {
        let _ = snapshot;
    }

    /// A connection was admitted; `snapshot.current` includes it.
    fn connection_opened(&self, snapshot: GateSnapshot);

    /// An admitted connection was released; `snapshot.current` excludes it.
    fn connection_closed(&self, snapshot: GateSnapshot);

    /// A connection was rejected and closed.
    fn connection_rejected(&self, snapshot: GateSnapshot) {
        let _ = snapshot;
    }
}

/// A sink that drops every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricSink for NoopSink {
    fn connection_opened(&self, _snapshot: GateSnapshot) {}

    fn connection_closed(&self, _snapshot: GateSnapshot) {}
}

/// Point-in-time statistics for one listening port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortStats {
    pub listener: String,
    pub port: u16,
    pub active_connections: u64,
    pub max_connections: u64,
    pub peak_connections: u64,
    pub opened_total: u64,
    pub closed_total: u64,
    pub rejected_total: u64,
}

/// Metric sink for one listening port.
///
/// Records into a shared [`MetricsRegistry`] under the `listener` and
/// `port` labels, and republishes a [`PortStats`] value on a watch channel
/// for in-process subscribers.
pub struct PortMetric {
    listener: String,
    port: u16,
    active: Gauge,
    max: Gauge,
    peak: Gauge,
    opened: Counter,
    closed: Counter,
    rejected: Counter,
    stats_tx: watch::Sender<PortStats>,
}

impl PortMetric {
    /// Register the per-port series in `registry`.
    pub fn new(listener: &str, port: u16, registry: &MetricsRegistry) -> Self {
        let port_label = port.to_string();
        let series = || labels([("listener", listener), ("port", port_label.as_str())]);

        registry.describe(names::ACTIVE_CONNECTIONS, "Currently open connections");
        registry.describe(names::MAX_CONNECTIONS, "Connection ceiling of the listener");
        registry.describe(names::PEAK_CONNECTIONS, "Highest number of simultaneously open connections");
        registry.describe(names::CONNECTIONS_OPENED, "Admitted connections");
        registry.describe(names::CONNECTIONS_CLOSED, "Closed admitted connections");
        registry.describe(names::CONNECTIONS_REJECTED, "Connections closed because the ceiling was reached");

        let (stats_tx, _) = watch::channel(PortStats {
            listener: listener.to_string(),
            port,
            ..PortStats::default()
        });

        Self {
            listener: listener.to_string(),
            port,
            active: registry.gauge(names::ACTIVE_CONNECTIONS, series()),
            max: registry.gauge(names::MAX_CONNECTIONS, series()),
            peak: registry.gauge(names::PEAK_CONNECTIONS, series()),
            opened: registry.counter(names::CONNECTIONS_OPENED, series()),
            closed: registry.counter(names::CONNECTIONS_CLOSED, series()),
            rejected: registry.counter(names::CONNECTIONS_REJECTED, series()),
            stats_tx,
        }
    }

    /// Listener name this metric is labelled with.
    pub fn listener(&self) -> &str {
        &self.listener
    }

    /// Port this metric is labelled with.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Current statistics.
    pub fn stats(&self) -> PortStats {
        self.stats_tx.borrow().clone()
    }

    /// Subscribe to statistics updates.
    pub fn subscribe(&self) -> watch::Receiver<PortStats> {
        self.stats_tx.subscribe()
    }

    fn publish(&self) {
        self.stats_tx.send_replace(PortStats {
            listener: self.listener.clone(),
            port: self.port,
            active_connections: self.active.get(),
            max_connections: self.max.get(),
            peak_connections: self.peak.get(),
            opened_total: self.opened.get(),
            closed_total: self.closed.get(),
            rejected_total: self.rejected.get(),
        });
    }
}

fn to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

impl MetricSink for PortMetric {
    fn gate_attached(&self, snapshot: GateSnapshot) {
        self.max.set(to_u64(snapshot.max));
        self.publish();
    }

    fn connection_opened(&self, snapshot: GateSnapshot) {
        self.opened.inc();
        self.active.inc();
        self.peak.set_max(to_u64(snapshot.current));
        self.publish();
    }

    fn connection_closed(&self, _snapshot: GateSnapshot) {
        self.closed.inc();
        self.active.dec();
        self.publish();
    }

    fn connection_rejected(&self, _snapshot: GateSnapshot) {
        self.rejected.inc();
        self.publish();
    }
}

impl std::fmt::Debug for PortMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortMetric")
            .field("listener", &self.listener)
            .field("port", &self.port)
            .field("active", &self.active.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(current: usize, max: usize) -> GateSnapshot {
        GateSnapshot { current, max }
    }

    #[test]
    fn test_port_metric_tracks_lifecycle() {
        let registry = MetricsRegistry::new();
        let metric = PortMetric::new("public", 8080, &registry);

        metric.gate_attached(snapshot(0, 2));
        metric.connection_opened(snapshot(1, 2));
        metric.connection_opened(snapshot(2, 2));
        metric.connection_rejected(snapshot(2, 2));
        metric.connection_closed(snapshot(1, 2));

        let stats = metric.stats();
        assert_eq!(stats.listener, "public");
        assert_eq!(stats.port, 8080);
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.max_connections, 2);
        assert_eq!(stats.peak_connections, 2);
        assert_eq!(stats.opened_total, 2);
        assert_eq!(stats.closed_total, 1);
        assert_eq!(stats.rejected_total, 1);
    }

    #[test]
    fn test_port_metric_exports_labelled_series() {
        let registry = MetricsRegistry::new();
        let metric = PortMetric::new("admin", 9000, &registry);
        metric.gate_attached(snapshot(0, 4));
        metric.connection_opened(snapshot(1, 4));

        let export = registry.export_prometheus();
        assert!(export.contains("turnstile_active_connections{listener=\"admin\",port=\"9000\"} 1"));
        assert!(export.contains("turnstile_max_connections{listener=\"admin\",port=\"9000\"} 4"));
        assert!(export.contains("turnstile_connections_opened_total{listener=\"admin\",port=\"9000\"} 1"));
        assert!(export.contains("# HELP turnstile_active_connections Currently open connections"));
    }

    #[test]
    fn test_subscribers_see_latest_stats() {
        let registry = MetricsRegistry::new();
        let metric = PortMetric::new("public", 8080, &registry);
        let mut rx = metric.subscribe();

        metric.connection_opened(snapshot(1, 10));

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().active_connections, 1);
    }

    #[test]
    fn test_noop_sink_accepts_everything() {
        let sink = NoopSink;
        sink.gate_attached(snapshot(0, 1));
        sink.connection_opened(snapshot(1, 1));
        sink.connection_rejected(snapshot(1, 1));
        sink.connection_closed(snapshot(0, 1));
    }
}

//! Rejection accounting and throttled warnings.

use crate::GateSnapshot;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const NEVER: u64 = u64::MAX;

/// Counts rejected connections and emits at most one summary warning per
/// interval.
///
/// The interval check is a single compare-and-swap on the last report
/// timestamp, so the accept path never blocks. Rejections that fall inside
/// an interval are summarised by a flush scheduled for the end of that
/// interval on the ambient tokio runtime. Without a runtime they wait for
/// the next rejection instead.
pub(crate) struct RejectionReporter {
    shared: Arc<Shared>,
}

struct Shared {
    label: String,
    max: usize,
    interval_ms: u64,
    origin: Instant,
    last_report_ms: AtomicU64,
    pending: AtomicU64,
    total: AtomicU64,
    reported: AtomicU64,
    flush_scheduled: AtomicBool,
}

impl RejectionReporter {
    pub(crate) fn new(label: String, max: usize, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                label,
                max,
                interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
                origin: Instant::now(),
                last_report_ms: AtomicU64::new(NEVER),
                pending: AtomicU64::new(0),
                total: AtomicU64::new(0),
                reported: AtomicU64::new(0),
                flush_scheduled: AtomicBool::new(false),
            }),
        }
    }

    /// Record one rejection. Returns the number of drops summarised by the
    /// warning if this call emitted one.
    pub(crate) fn record(&self, snapshot: GateSnapshot) -> Option<u64> {
        let shared = &self.shared;
        shared.total.fetch_add(1, Ordering::Relaxed);
        shared.pending.fetch_add(1, Ordering::AcqRel);

        debug!(
            listener = %shared.label,
            current = snapshot.current,
            max = snapshot.max,
            "connection rejected"
        );

        let now = shared.elapsed_ms();
        let last = shared.last_report_ms.load(Ordering::Acquire);
        let due = last == NEVER || now.saturating_sub(last) >= shared.interval_ms;

        // Only the thread that wins the swap reports this window.
        if due
            && shared
                .last_report_ms
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            return Some(shared.flush());
        }

        self.schedule_flush();
        None
    }

    /// Lifetime number of rejected connections.
    pub(crate) fn total(&self) -> u64 {
        self.shared.total.load(Ordering::Relaxed)
    }

    /// Number of rejections covered by a warning so far.
    #[cfg(test)]
    fn reported(&self) -> u64 {
        self.shared.reported.load(Ordering::Acquire)
    }

    fn schedule_flush(&self) {
        if self.shared.flush_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.shared.flush_scheduled.store(false, Ordering::Release);
            return;
        };

        let shared = Arc::clone(&self.shared);
        handle.spawn(async move {
            tokio::time::sleep(shared.until_next_window()).await;
            shared.flush_scheduled.store(false, Ordering::Release);
            shared
                .last_report_ms
                .store(shared.elapsed_ms(), Ordering::Release);
            shared.flush();
        });
    }
}

impl Shared {
    /// Drain pending drops into one warning.
    fn flush(&self) -> u64 {
        let dropped = self.pending.swap(0, Ordering::AcqRel);
        if dropped > 0 {
            self.reported.fetch_add(dropped, Ordering::AcqRel);
            warn!(
                listener = %self.label,
                dropped,
                max = self.max,
                "dropped {} connection(s) to limit the number of open connections to {}",
                dropped,
                self.max
            );
        }
        dropped
    }

    fn until_next_window(&self) -> Duration {
        let last = self.last_report_ms.load(Ordering::Acquire);
        if last == NEVER {
            return Duration::ZERO;
        }
        let elapsed = self.elapsed_ms().saturating_sub(last);
        Duration::from_millis(self.interval_ms.saturating_sub(elapsed))
    }

    fn elapsed_ms(&self) -> u64 {
        // NEVER is reserved; an uptime that large is not reachable anyway.
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(NEVER - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: GateSnapshot = GateSnapshot { current: 1, max: 1 };

    fn reporter(interval: Duration) -> RejectionReporter {
        RejectionReporter::new("public".to_string(), 1, interval)
    }

    #[test]
    fn test_first_rejection_is_reported_immediately() {
        let reporter = reporter(Duration::from_secs(3600));
        assert_eq!(reporter.record(SNAPSHOT), Some(1));
        assert_eq!(reporter.total(), 1);
        assert_eq!(reporter.reported(), 1);
    }

    #[test]
    fn test_rejections_inside_interval_are_batched() {
        let reporter = reporter(Duration::from_secs(3600));
        assert_eq!(reporter.record(SNAPSHOT), Some(1));
        assert_eq!(reporter.record(SNAPSHOT), None);
        assert_eq!(reporter.record(SNAPSHOT), None);
        assert_eq!(reporter.total(), 3);
        assert_eq!(reporter.shared.pending.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_zero_interval_reports_every_rejection() {
        let reporter = reporter(Duration::ZERO);
        for _ in 0..5 {
            assert_eq!(reporter.record(SNAPSHOT), Some(1));
        }
        assert_eq!(reporter.total(), 5);
    }

    #[test]
    fn test_without_runtime_next_rejection_flushes() {
        let reporter = reporter(Duration::from_millis(20));
        assert_eq!(reporter.record(SNAPSHOT), Some(1));
        assert_eq!(reporter.record(SNAPSHOT), None);
        assert!(!reporter.shared.flush_scheduled.load(Ordering::Acquire));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(reporter.record(SNAPSHOT), Some(2));
        assert_eq!(reporter.reported(), 3);
    }

    #[tokio::test]
    async fn test_burst_is_summarised_after_interval() {
        let reporter = reporter(Duration::from_millis(50));
        assert_eq!(reporter.record(SNAPSHOT), Some(1));
        for _ in 0..4 {
            assert_eq!(reporter.record(SNAPSHOT), None);
        }
        assert_eq!(reporter.reported(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(reporter.total(), 5);
        assert_eq!(reporter.reported(), 5);
        assert_eq!(reporter.shared.pending.load(Ordering::Acquire), 0);
        assert!(!reporter.shared.flush_scheduled.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_one_flush_scheduled_per_window() {
        let reporter = reporter(Duration::from_secs(3600));
        reporter.record(SNAPSHOT);
        reporter.record(SNAPSHOT);
        assert!(reporter.shared.flush_scheduled.load(Ordering::Acquire));
        reporter.record(SNAPSHOT);
        assert_eq!(reporter.shared.pending.load(Ordering::Acquire), 2);
    }
}

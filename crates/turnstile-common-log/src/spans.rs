//! Span helpers for listeners and connections.

use std::fmt::Display;
use std::time::{Duration, Instant};
use tracing::{field, info_span, Span};

/// Create a span covering one listener's accept loop.
pub fn listener_span(name: &str, addr: impl Display) -> Span {
    info_span!("listener", name = %name, addr = %addr)
}

/// Create a span covering one admitted connection.
///
/// The `error` field starts empty and is filled by [`record_error`].
pub fn connection_span(listener: &str, peer: impl Display) -> Span {
    info_span!("connection", listener = %listener, peer = %peer, error = field::Empty)
}

/// Record an error on the current span.
pub fn record_error(error: &dyn std::error::Error) {
    Span::current().record("error", field::display(error));
}

/// Timing utility for operations.
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start a new timer.
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    /// Complete the timer, log and return the duration.
    pub fn finish(self) -> Duration {
        let duration = self.start.elapsed();
        tracing::debug!(
            operation = %self.operation,
            duration_ms = %duration.as_millis(),
            "operation completed"
        );
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::EnvFilter;

    fn with_subscriber<F>(f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let subscriber = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(EnvFilter::new("trace"))
            .finish();

        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn test_connection_span_nests_in_listener_span() {
        with_subscriber(|| {
            let listener = listener_span("public", "127.0.0.1:8080");
            let _outer = listener.enter();

            let connection = connection_span("public", "127.0.0.1:50000");
            let _inner = connection.enter();

            tracing::info!("admitted");
        });
    }

    #[test]
    fn test_record_error_on_connection_span() {
        with_subscriber(|| {
            let span = connection_span("public", "10.0.0.1:1234");
            let _guard = span.enter();

            let error = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
            record_error(&error);

            tracing::debug!("connection ended");
        });
    }

    #[test]
    fn test_timer_measures_elapsed() {
        let timer = Timer::start("test_operation");
        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.finish() >= Duration::from_millis(10));
    }
}

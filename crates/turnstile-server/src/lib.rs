//! Turnstile server
//!
//! Binds every configured listener behind its own [`AdmissionGate`], hands
//! admitted connections to the configured [`ConnectionHandler`], and
//! optionally serves the gates' metrics over HTTP.
//!
//! # Architecture
//!
//! - **Accept loops**: one task per listener, stopped by the [`ShutdownCoordinator`]
//! - **Handlers**: one task per admitted connection
//! - **Exposition**: an axum router for `/metrics` and `/stats`

#![warn(clippy::all)]

pub mod error;
pub mod exposition;
pub mod handler;
pub mod shutdown;

pub use error::{ServerError, ServerResult};
pub use handler::{handler_for, Connection, ConnectionHandler, DiscardHandler, EchoHandler};
pub use shutdown::{shutdown_signal, ShutdownCoordinator};

use exposition::ExpositionState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};
use turnstile_common_config::{ListenerConfig, TurnstileConfig};
use turnstile_common_log::spans::{connection_span, listener_span, record_error, Timer};
use turnstile_common_metrics::MetricsRegistry;
use turnstile_gate::{AdmissionGate, GateBuilder, GatedListener, PortMetric};

/// Pause after a failed `accept` before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Entry point for starting a server.
pub struct Server;

impl Server {
    /// Bind every listener and the metrics endpoint, then start serving.
    ///
    /// Fails without serving anything if any ceiling is invalid or any
    /// address cannot be bound. Ceilings are checked before any socket is
    /// bound, and metrics are registered only once every socket is bound,
    /// so a failed startup leaves `registry` untouched.
    pub async fn bind(
        config: TurnstileConfig,
        registry: Arc<MetricsRegistry>,
    ) -> ServerResult<RunningServer> {
        let coordinator =
            ShutdownCoordinator::new(Duration::from_secs(config.shutdown.timeout_secs));

        let builders = config
            .listeners
            .iter()
            .map(gate_builder)
            .collect::<ServerResult<Vec<_>>>()?;

        let mut sockets = Vec::with_capacity(config.listeners.len());
        for listener_config in &config.listeners {
            sockets.push(bind_socket(listener_config).await?);
        }

        let metrics_socket = match &config.metrics {
            Some(metrics) => Some(bind_metrics_socket(&metrics.bind).await?),
            None => None,
        };

        let mut bound = Vec::with_capacity(sockets.len());
        for ((listener_config, builder), socket) in
            config.listeners.iter().zip(builders).zip(sockets)
        {
            bound.push(attach_gate(listener_config, builder, socket, &registry)?);
        }

        let metrics_addr = match metrics_socket {
            Some((socket, addr)) => {
                let ports = bound.iter().map(|(handle, _)| handle.metric.clone()).collect();
                let state = ExpositionState::new(registry.clone(), ports);
                serve_metrics(socket, state, coordinator.subscribe());
                Some(addr)
            }
            None => None,
        };

        let mut listeners = Vec::with_capacity(bound.len());
        let mut accept_tasks = Vec::with_capacity(bound.len());
        for ((handle, listener), listener_config) in bound.into_iter().zip(&config.listeners) {
            let handler = handler_for(listener_config.handler);
            let span = listener_span(&handle.name, handle.addr);
            accept_tasks.push(tokio::spawn(
                accept_loop(listener, handler, coordinator.subscribe()).instrument(span),
            ));
            listeners.push(handle);
        }

        Ok(RunningServer {
            listeners,
            metrics_addr,
            coordinator,
            accept_tasks,
        })
    }
}

/// A bound listener as seen from outside the accept loop.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    name: String,
    addr: SocketAddr,
    gate: AdmissionGate,
    metric: Arc<PortMetric>,
}

impl ListenerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn metric(&self) -> &Arc<PortMetric> {
        &self.metric
    }
}

/// How a shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every admitted connection closed in time.
    Drained,
    /// The timeout elapsed with connections still open.
    TimedOut { remaining: usize },
}

/// A server that is accepting connections.
pub struct RunningServer {
    listeners: Vec<ListenerHandle>,
    metrics_addr: Option<SocketAddr>,
    coordinator: ShutdownCoordinator,
    accept_tasks: Vec<JoinHandle<()>>,
}

impl RunningServer {
    pub fn listeners(&self) -> &[ListenerHandle] {
        &self.listeners
    }

    /// Bound address of each listener, in configuration order.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(|l| l.addr).collect()
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// The gate of each listener, in configuration order.
    pub fn gates(&self) -> Vec<AdmissionGate> {
        self.listeners.iter().map(|l| l.gate.clone()).collect()
    }

    /// The listener named `name`.
    pub fn listener(&self, name: &str) -> Option<&ListenerHandle> {
        self.listeners.iter().find(|l| l.name == name)
    }

    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.coordinator
    }

    /// Stop accepting and wait for open connections to finish.
    ///
    /// Connections still open when the shutdown timeout elapses are left to
    /// the runtime; their slots are released whenever they end.
    pub async fn shutdown(self) -> ShutdownOutcome {
        self.coordinator.initiate();
        for task in self.accept_tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "accept loop ended abnormally");
            }
        }

        let timeout = self.coordinator.timeout();
        let drain = async {
            for listener in &self.listeners {
                let mut stats = listener.metric.subscribe();
                // The sender lives in the metric we hold; this cannot fail.
                let _ = stats.wait_for(|s| s.active_connections == 0).await;
            }
        };

        let outcome = match tokio::time::timeout(timeout, drain).await {
            Ok(()) => ShutdownOutcome::Drained,
            Err(_) => ShutdownOutcome::TimedOut {
                remaining: self.listeners.iter().map(|l| l.gate.num_connections()).sum(),
            },
        };

        match outcome {
            ShutdownOutcome::Drained => info!("all connections closed, shutdown complete"),
            ShutdownOutcome::TimedOut { remaining } => warn!(
                remaining,
                timeout_secs = timeout.as_secs(),
                "shutdown timeout elapsed with connections still open"
            ),
        }
        outcome
    }
}

fn gate_builder(config: &ListenerConfig) -> ServerResult<GateBuilder> {
    let builder = match config.max_connections {
        Some(max) => GateBuilder::signed(max),
        None => AdmissionGate::builder(usize::MAX),
    };
    builder.validate().map_err(|source| ServerError::Gate {
        listener: config.name.clone(),
        source,
    })?;
    Ok(builder)
}

async fn bind_socket(config: &ListenerConfig) -> ServerResult<(TcpListener, SocketAddr)> {
    let bind_error = |source| ServerError::Bind {
        listener: config.name.clone(),
        addr: config.bind.clone(),
        source,
    };
    let listener = TcpListener::bind(&config.bind).await.map_err(bind_error)?;
    let addr = listener.local_addr().map_err(bind_error)?;
    Ok((listener, addr))
}

fn attach_gate(
    config: &ListenerConfig,
    builder: GateBuilder,
    (listener, addr): (TcpListener, SocketAddr),
    registry: &MetricsRegistry,
) -> ServerResult<(ListenerHandle, GatedListener)> {
    let metric = Arc::new(PortMetric::new(&config.name, addr.port(), registry));
    let gate = builder
        .label(config.name.clone())
        .metric_sink(metric.clone())
        .rejection_log_interval(Duration::from_millis(config.rejection_log_interval_ms))
        .build()
        .map_err(|source| ServerError::Gate {
            listener: config.name.clone(),
            source,
        })?;

    info!(
        listener = %config.name,
        %addr,
        max_connections = gate.max_connections(),
        handler = ?config.handler,
        "listening"
    );

    let handle = ListenerHandle {
        name: config.name.clone(),
        addr,
        gate: gate.clone(),
        metric,
    };
    Ok((handle, GatedListener::from_listener(listener, gate)))
}

async fn bind_metrics_socket(bind: &str) -> ServerResult<(TcpListener, SocketAddr)> {
    let bind_error = |source| ServerError::MetricsBind {
        addr: bind.to_string(),
        source,
    };
    let listener = TcpListener::bind(bind).await.map_err(bind_error)?;
    let addr = listener.local_addr().map_err(bind_error)?;
    Ok((listener, addr))
}

fn serve_metrics(listener: TcpListener, state: ExpositionState, mut shutdown: broadcast::Receiver<()>) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "metrics endpoint listening");
    }

    tokio::spawn(async move {
        let result = axum::serve(listener, exposition::router(state))
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;
        if let Err(err) = result {
            warn!(error = %err, "metrics endpoint stopped");
        }
    });
}

async fn accept_loop(
    listener: GatedListener,
    handler: Arc<dyn ConnectionHandler>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let name = listener.gate().label().to_string();
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("accept loop stopped");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => spawn_connection(&name, stream, peer, handler.clone()),
                Err(err) => {
                    warn!(error = %err, "failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }
}

fn spawn_connection(
    listener: &str,
    stream: Connection,
    peer: SocketAddr,
    handler: Arc<dyn ConnectionHandler>,
) {
    let span = connection_span(listener, peer);
    tokio::spawn(
        async move {
            let timer = Timer::start("connection");
            match handler.handle(stream, peer).await {
                Ok(bytes) => debug!(bytes, "connection finished"),
                Err(err) => {
                    record_error(&err);
                    debug!(error = %err, "connection ended with error");
                }
            }
            timer.finish();
        }
        .instrument(span),
    );
}

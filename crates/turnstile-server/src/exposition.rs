//! Metrics endpoint.
//!
//! - `GET /metrics`: Prometheus text exposition of the shared registry
//! - `GET /stats`: JSON array with one [`PortStats`] per listener
//! - `GET /health`: liveness

use axum::{extract::State, http::header, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;
use turnstile_common_metrics::MetricsRegistry;
use turnstile_gate::{PortMetric, PortStats};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// State shared by the metrics routes.
#[derive(Clone)]
pub struct ExpositionState {
    registry: Arc<MetricsRegistry>,
    ports: Arc<Vec<Arc<PortMetric>>>,
}

impl ExpositionState {
    pub fn new(registry: Arc<MetricsRegistry>, ports: Vec<Arc<PortMetric>>) -> Self {
        Self {
            registry,
            ports: Arc::new(ports),
        }
    }
}

/// Build the metrics router. Unknown paths answer 404.
pub fn router(state: ExpositionState) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .route("/stats", get(port_stats))
        .route("/health", get(health_check))
        .with_state(state)
}

async fn prometheus_metrics(State(state): State<ExpositionState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.registry.export_prometheus(),
    )
}

async fn port_stats(State(state): State<ExpositionState>) -> Json<Vec<PortStats>> {
    Json(state.ports.iter().map(|port| port.stats()).collect())
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use turnstile_gate::MetricSink;

    fn state() -> (ExpositionState, Arc<PortMetric>) {
        let registry = Arc::new(MetricsRegistry::new());
        let port = Arc::new(PortMetric::new("public", 7000, &registry));
        (ExpositionState::new(registry, vec![port.clone()]), port)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let (state, port) = state();
        port.gate_attached(turnstile_gate::GateSnapshot { current: 0, max: 5 });

        let (status, body) = get(router(state), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("turnstile_max_connections{listener=\"public\",port=\"7000\"} 5"));
    }

    #[tokio::test]
    async fn test_stats_route() {
        let (state, _port) = state();
        let (status, body) = get(router(state), "/stats").await;
        assert_eq!(status, StatusCode::OK);

        let stats: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(stats[0]["listener"], "public");
        assert_eq!(stats[0]["port"], 7000);
        assert_eq!(stats[0]["active_connections"], 0);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let (state, _port) = state();
        let (status, _) = get(router(state), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

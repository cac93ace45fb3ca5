//! Router and shared state for the relay hub.

use axum::{Router, routing::get};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use uuid::Uuid;

use crate::config::HubConfig;
use crate::handlers;
use crate::hub::Hub;
use crate::metrics::HubMetrics;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

/// Everything a handler needs. One hub per process, passed explicitly.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub metrics: Arc<HubMetrics>,
    pub config: Arc<HubConfig>,
}

impl AppState {
    pub fn new(config: HubConfig) -> Self {
        let metrics = Arc::new(HubMetrics::new());
        Self {
            hub: Arc::new(Hub::new(metrics.clone())),
            metrics,
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(handlers::websocket_handler))
        .route("/api/devices/{device_id}", get(handlers::device_handler))
        .route("/api/metrics", get(handlers::metrics_handler))
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfig;
    use crate::connection::Connection;
    use axum::{body::Body, http::Request, http::StatusCode};
    use relay_protocol::Role;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState::new(HubConfig::from_file(&FileConfig::default()))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_reports_devices_and_connections() {
        let state = test_state();
        let (conn, _rx) = Connection::new("dev1".into(), Role::Agent, 8);
        state.hub.register(conn).await;

        let (status, json) = get_json(router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["devices"], 1);
        assert_eq!(json["connections"], 1);
    }

    #[tokio::test]
    async fn test_health_ignores_read_errors_but_not_write_failures() {
        let state = test_state();

        // An abrupt client disconnect surfaces as a read error
        state.metrics.socket_error();
        let (_, json) = get_json(router(state.clone()), "/health").await;
        assert_eq!(json["status"], "healthy");

        state.metrics.write_failed();
        let (_, json) = get_json(router(state), "/health").await;
        assert_eq!(json["status"], "degraded");
    }

    #[tokio::test]
    async fn test_health_live() {
        let (status, json) = get_json(router(test_state()), "/health/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "alive");
    }

    #[tokio::test]
    async fn test_metrics_snapshot() {
        let state = test_state();
        let (conn, _rx) = Connection::new("dev1".into(), Role::Viewer, 8);
        state.hub.register(conn).await;

        let (status, json) = get_json(router(state), "/api/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["connections"]["active"], 1);
        assert_eq!(json["messages"]["dropped"], 0);
    }

    #[tokio::test]
    async fn test_device_stats() {
        let state = test_state();
        let (agent, _a_rx) = Connection::new("dev1".into(), Role::Agent, 8);
        let (viewer, _v_rx) = Connection::new("dev1".into(), Role::Viewer, 8);
        state.hub.register(agent).await;
        state.hub.register(viewer).await;

        let (status, json) = get_json(router(state.clone()), "/api/devices/dev1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["device_id"], "dev1");
        assert_eq!(json["agents"], 1);
        assert_eq!(json["viewers"], 1);
        assert_eq!(json["has_last_output"], false);

        let (status, _) = get_json(router(state), "/api/devices/unknown").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

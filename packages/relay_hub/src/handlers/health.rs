use axum::{Json, extract::State, response::IntoResponse};
use std::time::Duration;

use crate::metrics::HealthStatus;
use crate::server::AppState;

/// How long a failed write to a recipient keeps the hub "degraded".
/// Read errors are ordinary disconnects and never degrade it.
const DEGRADED_WINDOW: Duration = Duration::from_secs(60);

/// Health check endpoint - returns hub status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let devices = state.hub.device_count().await as u64;
    let connections = state.hub.total_connections().await as u64;
    let metrics = state.metrics.snapshot();

    let status = if state.metrics.write_failed_within(DEGRADED_WINDOW) {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthStatus {
        status: status.to_string(),
        devices,
        connections,
        uptime_secs: metrics.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed hub metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use relay_protocol::DeviceId;

use crate::server::AppState;

/// `GET /api/devices/{device_id}`: connection counts for a device with at
/// least one live connection.
pub async fn device_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Response {
    match state.hub.device_snapshot(&DeviceId::from(device_id)).await {
        Some(stats) => Json(stats).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use relay_protocol::ConnectParams;
use tracing::{info, warn};

use crate::pump;
use crate::server::AppState;

/// `GET /ws?device_id=..[&token=..]` upgrades and hands the socket to the pumps.
pub async fn websocket_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let device_id = match params.validate() {
        Ok(id) => id,
        Err(e) => {
            warn!("Rejected websocket connection: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };
    let role = params.role();
    info!(device_id = %device_id, role = %role, "WebSocket connection request");

    let hub = state.hub.clone();
    let config = state.config.websocket.clone();
    ws.on_upgrade(move |socket| pump::run_connection(socket, hub, device_id, role, config))
}

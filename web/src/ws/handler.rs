use crate::ws::actor;
use crate::AppState;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use log::*;

/// GET upgrade to the relay WebSocket
#[utoipa::path(
    get,
    path = "/ws",
    responses(
        (status = 101, description = "Switching to the relay WebSocket protocol"),
        (status = 400, description = "Not a WebSocket upgrade request")
    )
)]
pub async fn ws_upgrade(State(app_state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    debug!("Upgrading relay WebSocket connection");

    let relay = app_state.relay.clone();
    ws.on_upgrade(move |socket| actor::run_connection(socket, relay))
}

//! Axum WebSocket upgrade handler.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use super::connection::run_session;
use crate::app_state::AppState;

/// Query parameters accepted on `/ws`.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Last state sequence the client already applied.
    #[serde(rename = "lastSeen")]
    pub last_seen: Option<u64>,
}

/// `GET /ws`: Upgrade HTTP connection to WebSocket.
///
/// The session is registered once the handshake completes and immediately
/// receives the current snapshot unless `lastSeen` shows it is current.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let manager = Arc::clone(&state.sessions);
    let options = state.session_options;
    let shutdown = state.shutdown.child_token();

    ws.on_upgrade(move |socket| async move {
        let session = manager.accept(params.last_seen);
        run_session(socket, manager, session, options, shutdown).await;
    })
}

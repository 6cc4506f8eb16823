use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
};
use serde::Deserialize;

use crate::auth::authenticate;
use crate::error::Result;
use crate::realtime::serve_socket;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: String,
}

/// `GET /ws?token=<jwt>`: authenticate, then hand the socket to the realtime layer
///
/// Browsers cannot attach an Authorization header to a WebSocket handshake,
/// so the access token travels in the query string.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let user = authenticate(&state, &params.token).await?;
    tracing::debug!("WebSocket upgrade for user {}", user.id);
    Ok(ws.on_upgrade(move |socket| serve_socket(socket, state, user)))
}

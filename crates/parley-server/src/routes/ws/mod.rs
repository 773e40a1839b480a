//! WebSocket endpoint.
//!
//! The socket is the only chat surface: clients authenticate with their first
//! message, then send routable messages that flow through the dispatch
//! service. Outbound messages are delivered through a per-connection channel
//! drained by a writer task.
//!
//! - `connection` - connection lifecycle: read loop, writer task, ownership

mod connection;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
};

use crate::state::AppState;

/// GET /ws - WebSocket upgrade handler.
///
/// Authentication happens via the first message (`auth` type) rather than
/// HTTP headers, to support browsers that cannot set custom headers on
/// WebSocket upgrade.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.config.max_ws_message_size)
        .on_upgrade(|socket| connection::handle_socket(socket, state))
}

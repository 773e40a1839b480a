//! WebSocket connection lifecycle.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_dispatch::{ClientMessage, MessageRouter, ServerMessage};
use parley_types::{ConnectionId, ThreadId, UserId};

use crate::ownership::Claim;
use crate::state::AppState;

/// Identity used before authentication and in localhost mode.
const LOCAL_USER: &str = "local";

/// Per-connection state held by the read loop.
struct ConnectionState {
    id: ConnectionId,
    authenticated: bool,
    user_id: UserId,
    /// Reconnect tokens for owned threads, used to create pending reconnects
    /// on disconnect.
    reconnect_tokens: HashMap<ThreadId, String>,
    /// Outbound channel, shared with the connection registry.
    tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Handle a WebSocket connection.
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let mut conn = ConnectionState {
        id: ConnectionId::new(),
        // Auto-authenticate if no auth token is configured (localhost mode).
        authenticated: state.config.auth_token.is_none(),
        user_id: UserId::new(LOCAL_USER),
        reconnect_tokens: HashMap::new(),
        tx: tx.clone(),
    };

    state.connections.register(conn.id, conn.user_id.clone(), tx);
    debug!(connection_id = %conn.id, "WebSocket connection established");

    // Writer task: everything outbound flows through the channel so the
    // dispatch service and the read loop never contend for the sink.
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize outbound message");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let router = state.router();

    loop {
        // Wait for the next message with idle timeout.
        let msg = match tokio::time::timeout(state.config.idle_timeout, receiver.next()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(_) => {
                info!(connection_id = %conn.id, "WebSocket closed due to idle timeout");
                let _ = conn.tx.send(ServerMessage::error(
                    "idle_timeout",
                    "Connection closed due to inactivity",
                ));
                break;
            }
        };

        // Accept Text frames and Binary frames containing UTF-8 JSON.
        let text = match msg {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    let _ = conn.tx.send(ServerMessage::error(
                        "invalid_message",
                        "Binary data must be UTF-8",
                    ));
                    continue;
                }
            },
            // Protocol-level pings are answered by axum.
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(connection_id = %conn.id, error = %e, "WebSocket error");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                let _ = conn.tx.send(ServerMessage::error(
                    "parse_error",
                    format!("Invalid message: {e}"),
                ));
                continue;
            }
        };

        handle_message(client_msg, &mut conn, &state, &router);
    }

    // Release ownership of this connection's threads, holding each for the
    // reconnect grace period.
    state.connections.unregister(conn.id);
    state.ownership.release_all(conn.id, &conn.reconnect_tokens);
    writer.abort();

    debug!(connection_id = %conn.id, "WebSocket connection closed");
}

/// Handle one parsed client message.
fn handle_message(
    msg: ClientMessage,
    conn: &mut ConnectionState,
    state: &AppState,
    router: &MessageRouter,
) {
    match msg {
        ClientMessage::Ping => {
            let _ = conn.tx.send(ServerMessage::Pong);
        }

        ClientMessage::Auth { token, user } => handle_auth(token, user, conn, state),

        ClientMessage::ResumeThread {
            thread_id,
            reconnect_token,
        } => handle_resume(thread_id, reconnect_token, conn, state),

        routable => {
            if !conn.authenticated {
                let _ = conn
                    .tx
                    .send(ServerMessage::error("unauthorized", "Authentication required"));
                return;
            }

            // Mutating messages require thread ownership; the first mutating
            // touch claims the thread. Claims are scoped to this connection's
            // user, tenancy itself is enforced in the store.
            if let Some(thread_id) = mutated_thread(&routable) {
                match state.ownership.try_claim(&conn.user_id, thread_id, conn.id) {
                    Claim::Granted { reconnect_token } => {
                        conn.reconnect_tokens
                            .insert(thread_id, reconnect_token.clone());
                        let _ = conn.tx.send(ServerMessage::ThreadClaimed {
                            thread_id,
                            reconnect_token,
                        });
                    }
                    Claim::AlreadyOwner => {}
                    Claim::Denied => {
                        let _ = conn.tx.send(ServerMessage::error(
                            "not_thread_owner",
                            "Thread is owned by another connection",
                        ));
                        return;
                    }
                }
            }

            if let Err(e) = router.dispatch(conn.user_id.clone(), conn.id, routable) {
                let _ = conn.tx.send(ServerMessage::error(e.code(), e.to_string()));
            }
        }
    }
}

/// Handle authentication.
fn handle_auth(
    token: String,
    user: Option<String>,
    conn: &mut ConnectionState,
    state: &AppState,
) {
    let authed = match &state.config.auth_token {
        None => true,
        Some(expected) => token == *expected,
    };
    if authed {
        conn.authenticated = true;
        if let Some(user) = user {
            conn.user_id = UserId::new(user);
            state.connections.set_user(conn.id, conn.user_id.clone());
        }
        let _ = conn.tx.send(ServerMessage::auth_success());
    } else {
        let _ = conn.tx.send(ServerMessage::auth_failure("Invalid token"));
    }
}

/// Handle a thread ownership reclaim after reconnect.
fn handle_resume(
    thread_id: ThreadId,
    reconnect_token: String,
    conn: &mut ConnectionState,
    state: &AppState,
) {
    if !conn.authenticated {
        let _ = conn
            .tx
            .send(ServerMessage::error("unauthorized", "Authentication required"));
        return;
    }

    match state
        .ownership
        .try_reclaim(&conn.user_id, thread_id, &reconnect_token, conn.id)
    {
        Some(new_token) => {
            conn.reconnect_tokens.insert(thread_id, new_token.clone());
            let _ = conn.tx.send(ServerMessage::ThreadResumed {
                thread_id,
                reconnect_token: new_token,
            });
        }
        None => {
            let _ = conn.tx.send(ServerMessage::error(
                "invalid_reconnect_token",
                "Reconnect token is invalid or expired",
            ));
        }
    }
}

/// The thread a message mutates, if any.
///
/// `get_thread_history` is read-only; tenant scoping in the store covers it.
/// A `start_agent` without a thread ID creates a fresh thread, which is
/// claimed on the connection's next mutating touch.
fn mutated_thread(msg: &ClientMessage) -> Option<ThreadId> {
    match msg {
        ClientMessage::StartAgent { thread_id, .. } => *thread_id,
        ClientMessage::UserMessage { thread_id, .. } => Some(*thread_id),
        ClientMessage::StopAgent { thread_id } => Some(*thread_id),
        _ => None,
    }
}

//! Outbound notification channel abstraction.
//!
//! The server's connection manager implements this; handlers and the worker
//! loop use it to deliver [`ServerMessage`]s without knowing anything about
//! WebSockets.

use async_trait::async_trait;

use parley_types::{ConnectionId, UserId};

use crate::message::ServerMessage;

/// Delivers outbound messages to connected clients.
///
/// Delivery is best-effort: notifying a user with no live connections is not
/// an error, it is a no-op.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a message to every live connection of a user.
    async fn notify_user(&self, user_id: &UserId, message: ServerMessage);

    /// Send a message to one specific connection.
    ///
    /// Falls back silently if the connection has gone away.
    async fn notify_connection(&self, connection_id: ConnectionId, message: ServerMessage);
}

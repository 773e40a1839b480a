//! Live connection registry and outbound message delivery.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use parley_dispatch::{Notifier, ServerMessage};
use parley_types::{ConnectionId, UserId};

struct ConnectionEntry {
    user_id: UserId,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

/// Registry of live WebSocket connections, indexed by user.
///
/// Implements [`Notifier`] for the dispatch service: per-connection delivery
/// goes to that connection's writer channel, per-user delivery fans out to
/// every live connection of the user. Delivery to a connection that has gone
/// away is dropped silently.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    inner: Arc<Mutex<Registry>>,
}

impl ConnectionManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound channel.
    pub fn register(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) {
        let mut inner = self.inner.lock();
        inner.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id: user_id.clone(),
                tx,
            },
        );
        inner.by_user.entry(user_id).or_default().insert(connection_id);
        debug!(connection_id = %connection_id, "Connection registered");
    }

    /// Re-key a connection under a different user after authentication.
    pub fn set_user(&self, connection_id: ConnectionId, user_id: UserId) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.connections.get(&connection_id) else {
            return;
        };
        let old_user = entry.user_id.clone();
        if old_user == user_id {
            return;
        }

        if let Some(set) = inner.by_user.get_mut(&old_user) {
            set.remove(&connection_id);
            if set.is_empty() {
                inner.by_user.remove(&old_user);
            }
        }
        inner.by_user.entry(user_id.clone()).or_default().insert(connection_id);
        if let Some(entry) = inner.connections.get_mut(&connection_id) {
            entry.user_id = user_id;
        }
    }

    /// Remove a connection.
    pub fn unregister(&self, connection_id: ConnectionId) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.connections.remove(&connection_id) {
            if let Some(set) = inner.by_user.get_mut(&entry.user_id) {
                set.remove(&connection_id);
                if set.is_empty() {
                    inner.by_user.remove(&entry.user_id);
                }
            }
        }
        debug!(connection_id = %connection_id, "Connection unregistered");
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.inner.lock().connections.len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Notifier for ConnectionManager {
    async fn notify_user(&self, user_id: &UserId, message: ServerMessage) {
        let senders: Vec<mpsc::UnboundedSender<ServerMessage>> = {
            let inner = self.inner.lock();
            inner
                .by_user
                .get(user_id)
                .into_iter()
                .flatten()
                .filter_map(|id| inner.connections.get(id).map(|e| e.tx.clone()))
                .collect()
        };

        if senders.is_empty() {
            trace!(user_id = %user_id, "No live connections for user; dropping message");
            return;
        }
        for tx in senders {
            let _ = tx.send(message.clone());
        }
    }

    async fn notify_connection(&self, connection_id: ConnectionId, message: ServerMessage) {
        let tx = {
            let inner = self.inner.lock();
            inner.connections.get(&connection_id).map(|e| e.tx.clone())
        };
        match tx {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => {
                trace!(connection_id = %connection_id, "Connection gone; dropping message");
            }
        }
    }
}

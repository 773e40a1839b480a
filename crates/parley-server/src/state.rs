//! Application state shared across handlers.

use std::sync::Arc;

use tokio::task::JoinHandle;

use parley_dispatch::{
    MessageHandlerService, MessageRouter, ServiceConfig, Supervisor,
};
use parley_store::ChatStore;

use crate::config::ServerConfig;
use crate::connections::ConnectionManager;
use crate::ownership::ThreadOwnership;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,

    /// Chat persistence.
    pub store: Arc<ChatStore>,

    /// The dispatch service.
    pub service: Arc<MessageHandlerService>,

    /// Live connection registry (also the dispatch service's notifier).
    pub connections: ConnectionManager,

    /// Thread ownership registry.
    pub ownership: ThreadOwnership,
}

impl AppState {
    /// Create application state, wiring the dispatch service to the
    /// connection registry for outbound delivery.
    pub fn new(config: ServerConfig, store: Arc<ChatStore>, supervisor: Arc<dyn Supervisor>) -> Self {
        let connections = ConnectionManager::new();
        let service = Arc::new(MessageHandlerService::new(
            ServiceConfig {
                queue_capacity: config.queue_capacity,
            },
            Arc::clone(&store),
            Arc::new(connections.clone()),
            supervisor,
        ));
        let ownership = ThreadOwnership::new(config.reconnect_grace_period);

        Self {
            config: Arc::new(config),
            store,
            service,
            connections,
            ownership,
        }
    }

    /// A router feeding the dispatch queue.
    pub fn router(&self) -> MessageRouter {
        self.service.router()
    }

    /// Spawn the dispatch worker loop.
    pub fn spawn_worker(&self) -> JoinHandle<()> {
        self.service.spawn()
    }

    /// Stop the dispatch service.
    pub fn shutdown(&self) {
        self.service.shutdown();
    }
}

//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Default grace period for thread ownership reconnect tokens (30 seconds).
pub const DEFAULT_RECONNECT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Default max message size for WebSocket (1 MB).
pub const DEFAULT_MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default idle timeout for WebSocket connections (5 minutes).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default dispatch queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// Authentication token. `None` means auth is disabled (localhost mode).
    pub auth_token: Option<String>,

    /// Maximum WebSocket message size in bytes.
    /// Messages exceeding this limit are rejected. Default: 1 MB.
    pub max_ws_message_size: usize,

    /// Idle timeout for WebSocket connections.
    /// Connections receiving no messages for this duration are closed.
    pub idle_timeout: Duration,

    /// Grace period for thread ownership reconnect tokens.
    /// After disconnect, ownership is held for this duration to allow
    /// reconnection.
    pub reconnect_grace_period: Duration,

    /// Capacity of the dispatch queue.
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".parse().unwrap(),
            auth_token: None,
            max_ws_message_size: DEFAULT_MAX_WS_MESSAGE_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reconnect_grace_period: DEFAULT_RECONNECT_GRACE_PERIOD,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Create a new server config with an optional auth token.
    /// Pass `None` to disable authentication (localhost mode).
    pub fn new(auth_token: Option<String>) -> Self {
        Self {
            auth_token,
            ..Default::default()
        }
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Set the maximum WebSocket message size.
    pub fn with_max_ws_message_size(mut self, size: usize) -> Self {
        self.max_ws_message_size = size;
        self
    }

    /// Set the idle timeout for WebSocket connections.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the reconnect grace period for thread ownership.
    pub fn with_reconnect_grace_period(mut self, duration: Duration) -> Self {
        self.reconnect_grace_period = duration;
        self
    }

    /// Set the dispatch queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

//! WebSocket server for the Parley chat backend.
//!
//! The server exposes a single chat surface at `GET /ws`. Clients
//! authenticate with their first message, then exchange the JSON protocol
//! defined in `parley-dispatch`; every routable message flows through the
//! dispatch service's priority queue and handler registry.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use parley_server::{Server, ServerConfig};
//! use parley_store::ChatStore;
//!
//! let store = Arc::new(ChatStore::open("parley.db")?);
//! let config = ServerConfig::new(Some("secret-token".to_string()))
//!     .with_bind_address("127.0.0.1:8080".parse()?);
//!
//! let server = Server::new(config, store, supervisor);
//! server.run().await?;
//! ```

pub mod config;
pub mod connections;
pub mod error;
pub mod ownership;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use connections::ConnectionManager;
pub use error::{Result, ServerError};
pub use ownership::{Claim, ThreadOwnership};
pub use state::AppState;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_dispatch::Supervisor;
use parley_store::ChatStore;

/// The Parley WebSocket server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a new server.
    pub fn new(config: ServerConfig, store: Arc<ChatStore>, supervisor: Arc<dyn Supervisor>) -> Self {
        Self {
            state: AppState::new(config, store, supervisor),
        }
    }

    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    /// The application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        use axum::routing::get;

        Router::new()
            // Health route (no auth required)
            .merge(routes::health_routes())
            // WebSocket (auth happens via message, not HTTP header)
            .route("/ws", get(routes::ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Spawn the dispatch worker loop.
    pub fn spawn_worker(&self) -> JoinHandle<()> {
        self.state.spawn_worker()
    }

    /// Run the server on its configured address.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_on(addr).await
    }

    /// Run the server on a specific address (useful for testing).
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        self.run_until(addr, std::future::pending()).await
    }

    /// Run the server until the shutdown future resolves.
    ///
    /// On shutdown the dispatch queue is closed and drained before returning.
    pub async fn run_until(
        self,
        addr: SocketAddr,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let worker = self.spawn_worker();
        let router = self.router();
        let state = self.state;

        info!("Starting server on {}", addr);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind: {e}")))?;

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {e}")));

        state.shutdown();
        let _ = worker.await;
        result
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}

//! HTTP and WebSocket routes.

mod health;
pub mod ws;

pub use health::{health, health_routes, HealthResponse};
pub use ws::ws_handler;

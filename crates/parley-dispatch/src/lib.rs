//! Message routing and handler dispatch for the Parley chat backend.
//!
//! Incoming WebSocket messages flow through three stages:
//!
//! 1. [`MessageRouter::dispatch`] — validate and sanitize the payload, assign
//!    a [`Priority`] from the static per-type mapping, and enqueue.
//! 2. [`MessageQueue`] — an async priority queue. Higher-priority messages
//!    dequeue first; messages of equal priority dequeue in arrival order.
//! 3. [`MessageHandlerService`] — the worker loop. For each envelope it
//!    resolves a per-`(kind, user)` handler from the [`HandlerRegistry`]
//!    (lazily constructed, single-flight) and invokes it with error
//!    containment: a failing handler produces an `Error` message on the
//!    requesting user's notification channel, never a dead worker.
//!
//! External collaborators are injected as traits: [`Supervisor`] runs the
//! agent, [`Notifier`] delivers outbound messages, and the store provides the
//! transactional unit of work.

mod error;
mod handler;
mod handlers;
mod message;
mod priority;
mod queue;
mod registry;
mod runs;
mod service;
mod validate;

pub mod notify;
pub mod supervisor;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::DispatchError;
pub use handler::{HandlerContext, MessageHandler};
pub use handlers::DefaultHandlerFactory;
pub use message::{ClientMessage, HandlerKind, ServerMessage};
pub use notify::Notifier;
pub use priority::Priority;
pub use queue::{Envelope, MessageQueue};
pub use registry::{HandlerFactory, HandlerKey, HandlerRegistry};
pub use runs::ActiveRuns;
pub use service::{MessageHandlerService, MessageRouter, ServiceConfig};
pub use supervisor::{AgentEvent, Supervisor, SupervisorError};
pub use validate::{MAX_CONTENT_BYTES, MAX_HISTORY_LIMIT};

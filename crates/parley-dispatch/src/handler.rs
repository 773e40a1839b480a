//! The message handler contract and the context handlers execute against.

use std::sync::Arc;

use async_trait::async_trait;

use parley_store::ChatStore;

use crate::error::DispatchError;
use crate::notify::Notifier;
use crate::queue::Envelope;
use crate::runs::ActiveRuns;
use crate::supervisor::Supervisor;

/// Dependencies shared by all handlers.
#[derive(Clone)]
pub struct HandlerContext {
    /// Transactional persistence.
    pub store: Arc<ChatStore>,
    /// Outbound notification channel.
    pub notifier: Arc<dyn Notifier>,
    /// Agent execution engine.
    pub supervisor: Arc<dyn Supervisor>,
    /// In-flight run tracking.
    pub active_runs: ActiveRuns,
}

/// A handler for one WebSocket message type.
///
/// Handlers are constructed lazily per `(kind, user)` by the
/// [`HandlerRegistry`](crate::HandlerRegistry) and invoked by the worker loop.
/// A handler reports outcomes to the client through `ctx.notifier`; returning
/// `Err` is contained by the service, which notifies the requesting user and
/// keeps running.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one routed message.
    async fn handle_message(
        &self,
        ctx: &HandlerContext,
        envelope: &Envelope,
    ) -> Result<(), DispatchError>;
}

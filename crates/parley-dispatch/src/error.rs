//! Error types for the dispatch crate.

use parley_types::ThreadId;
use thiserror::Error;

use crate::supervisor::SupervisorError;

/// Errors that can occur while routing or handling a message.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Payload failed validation; nothing was enqueued.
    #[error("Invalid payload: {0}")]
    Invalid(String),

    /// The message queue is at capacity.
    #[error("Message queue full")]
    QueueFull,

    /// The message queue has been closed (service shutting down).
    #[error("Message queue closed")]
    QueueClosed,

    /// An agent run is already active on the thread.
    #[error("Agent run already active on thread {0}")]
    RunActive(ThreadId),

    /// No agent run is active on the thread.
    #[error("No active agent run on thread {0}")]
    NoActiveRun(ThreadId),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] parley_store::StoreError),

    /// Agent execution failure.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

impl DispatchError {
    /// Stable error code sent to clients over the notification channel.
    pub fn code(&self) -> &'static str {
        use parley_store::StoreError;

        match self {
            DispatchError::Invalid(_) => "invalid_payload",
            DispatchError::QueueFull => "queue_full",
            DispatchError::QueueClosed => "unavailable",
            DispatchError::RunActive(_) => "run_active",
            DispatchError::NoActiveRun(_) => "no_active_run",
            DispatchError::Store(StoreError::NotFound(_)) => "not_found",
            DispatchError::Store(StoreError::Forbidden(_)) => "forbidden",
            DispatchError::Store(_) => "storage_error",
            DispatchError::Supervisor(_) => "agent_error",
        }
    }
}

//! Supervisor abstraction — the agent execution engine.
//!
//! The actual agent (LLM invocation, tool use, planning) lives outside this
//! codebase. Handlers drive it through this trait; tests inject
//! [`MockSupervisor`](crate::testing::MockSupervisor).

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use parley_types::{ThreadId, UserId};

/// Events produced by a supervisor run.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A chunk of the assistant response.
    Chunk {
        /// Text content.
        content: String,
    },
    /// The run finished normally.
    Done,
    /// The run failed mid-stream.
    Error {
        /// Failure detail.
        message: String,
    },
}

/// Errors starting a supervisor run.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The supervisor could not start the run.
    #[error("Agent failure: {0}")]
    Failed(String),
}

/// The agent execution engine, injected into handlers.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Run the agent against a user message on a thread.
    ///
    /// Returns a stream of [`AgentEvent`]s. Implementations must observe the
    /// cancellation token and end the stream promptly when it fires.
    async fn run(
        &self,
        thread_id: ThreadId,
        user_id: &UserId,
        message: &str,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, AgentEvent>, SupervisorError>;
}

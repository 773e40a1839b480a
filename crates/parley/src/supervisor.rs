//! Built-in echo agent.
//!
//! Stands in until a real model backend is wired up: it streams a short
//! acknowledgment of the user's message, word by word, and honors
//! cancellation between chunks.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use parley_dispatch::{AgentEvent, Supervisor, SupervisorError};
use parley_types::{ThreadId, UserId};

/// Supervisor that echoes the user's message back.
pub struct EchoSupervisor;

#[async_trait]
impl Supervisor for EchoSupervisor {
    async fn run(
        &self,
        _thread_id: ThreadId,
        _user_id: &UserId,
        message: &str,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, AgentEvent>, SupervisorError> {
        let words: Vec<String> = format!("You said: {message}")
            .split_whitespace()
            .map(|w| format!("{w} "))
            .collect();

        let stream = async_stream::stream! {
            for word in words {
                if cancel.is_cancelled() {
                    yield AgentEvent::Error {
                        message: "cancelled".into(),
                    };
                    return;
                }
                yield AgentEvent::Chunk { content: word };
            }
            yield AgentEvent::Done;
        };

        Ok(Box::pin(stream))
    }
}

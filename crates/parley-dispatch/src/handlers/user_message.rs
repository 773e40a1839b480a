//! Handler for `user_message`.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use parley_types::{ChatMessage, ChatRole};

use crate::error::DispatchError;
use crate::handler::{HandlerContext, MessageHandler};
use crate::message::{ClientMessage, ServerMessage};
use crate::queue::Envelope;
use crate::supervisor::AgentEvent;

/// Persists a user message and streams the agent reply back.
pub struct UserMessageHandler;

#[async_trait]
impl MessageHandler for UserMessageHandler {
    async fn handle_message(
        &self,
        ctx: &HandlerContext,
        envelope: &Envelope,
    ) -> Result<(), DispatchError> {
        let (thread_id, content) = match &envelope.message {
            ClientMessage::UserMessage { thread_id, content } => (*thread_id, content.clone()),
            other => {
                return Err(DispatchError::Invalid(format!(
                    "UserMessageHandler received {other:?}"
                )))
            }
        };

        let user_id = envelope.user_id.clone();
        let message = ChatMessage::new(thread_id, ChatRole::User, content.clone());
        ctx.store
            .with_unit_of_work(|uow| -> Result<(), DispatchError> {
                uow.get_thread_owned(thread_id, &user_id)?;
                uow.insert_message(&message)?;
                uow.touch_thread(thread_id, Utc::now())?;
                Ok(())
            })?;

        ctx.notifier
            .notify_connection(
                envelope.connection_id,
                ServerMessage::MessageSaved {
                    thread_id,
                    message_id: message.id,
                },
            )
            .await;

        // Stream the agent reply. Cancellation follows the thread's active
        // run token when one exists, so stop_agent interrupts the reply too.
        let cancel = ctx
            .active_runs
            .get(thread_id)
            .map(|r| r.cancel)
            .unwrap_or_else(CancellationToken::new);

        let mut stream = ctx
            .supervisor
            .run(thread_id, &envelope.user_id, &content, cancel)
            .await?;

        let mut full_response = String::new();
        while let Some(event) = stream.next().await {
            match event {
                AgentEvent::Chunk { content } => {
                    full_response.push_str(&content);
                    ctx.notifier
                        .notify_connection(
                            envelope.connection_id,
                            ServerMessage::AgentChunk {
                                thread_id,
                                content,
                                done: false,
                            },
                        )
                        .await;
                }
                AgentEvent::Done => {
                    if !full_response.is_empty() {
                        let reply =
                            ChatMessage::new(thread_id, ChatRole::Assistant, full_response.clone());
                        let persisted = ctx.store.with_unit_of_work(
                            |uow| -> Result<(), DispatchError> {
                                uow.insert_message(&reply)?;
                                uow.touch_thread(thread_id, Utc::now())?;
                                Ok(())
                            },
                        );
                        if let Err(e) = persisted {
                            warn!(thread_id = %thread_id, error = %e, "Failed to persist agent reply");
                        }
                    }
                    ctx.notifier
                        .notify_connection(
                            envelope.connection_id,
                            ServerMessage::AgentChunk {
                                thread_id,
                                content: String::new(),
                                done: true,
                            },
                        )
                        .await;
                }
                AgentEvent::Error { message } => {
                    debug!(thread_id = %thread_id, error = %message, "Agent stream error");
                    ctx.notifier
                        .notify_connection(
                            envelope.connection_id,
                            ServerMessage::error("agent_error", message),
                        )
                        .await;
                }
            }
        }

        Ok(())
    }
}

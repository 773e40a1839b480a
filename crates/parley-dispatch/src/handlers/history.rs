//! Handler for `get_thread_history`.

use async_trait::async_trait;

use parley_types::ChatMessage;

use crate::error::DispatchError;
use crate::handler::{HandlerContext, MessageHandler};
use crate::message::{ClientMessage, ServerMessage};
use crate::queue::Envelope;
use crate::validate::MAX_HISTORY_LIMIT;

/// Default number of messages returned when the client omits a limit.
const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Reads persisted thread history for its owner.
pub struct GetThreadHistoryHandler;

#[async_trait]
impl MessageHandler for GetThreadHistoryHandler {
    async fn handle_message(
        &self,
        ctx: &HandlerContext,
        envelope: &Envelope,
    ) -> Result<(), DispatchError> {
        let (thread_id, limit) = match &envelope.message {
            ClientMessage::GetThreadHistory { thread_id, limit } => (*thread_id, *limit),
            other => {
                return Err(DispatchError::Invalid(format!(
                    "GetThreadHistoryHandler received {other:?}"
                )))
            }
        };

        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .min(MAX_HISTORY_LIMIT);

        let user_id = envelope.user_id.clone();
        let messages: Vec<ChatMessage> = ctx
            .store
            .with_unit_of_work(|uow| -> Result<_, DispatchError> {
                Ok(uow.list_messages(&user_id, thread_id, limit)?)
            })?;

        ctx.notifier
            .notify_connection(
                envelope.connection_id,
                ServerMessage::ThreadHistory {
                    thread_id,
                    messages,
                },
            )
            .await;

        Ok(())
    }
}

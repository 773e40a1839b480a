//! Handler for `stop_agent`.

use async_trait::async_trait;
use tracing::info;

use parley_types::RunStatus;

use crate::error::DispatchError;
use crate::handler::{HandlerContext, MessageHandler};
use crate::message::{ClientMessage, ServerMessage};
use crate::queue::Envelope;

/// Cancels the active agent run on a thread.
pub struct StopAgentHandler;

#[async_trait]
impl MessageHandler for StopAgentHandler {
    async fn handle_message(
        &self,
        ctx: &HandlerContext,
        envelope: &Envelope,
    ) -> Result<(), DispatchError> {
        let thread_id = match &envelope.message {
            ClientMessage::StopAgent { thread_id } => *thread_id,
            other => {
                return Err(DispatchError::Invalid(format!(
                    "StopAgentHandler received {other:?}"
                )))
            }
        };

        let user_id = envelope.user_id.clone();
        let run_id = ctx
            .store
            .with_unit_of_work(|uow| -> Result<_, DispatchError> {
                uow.get_thread_owned(thread_id, &user_id)?;
                let active = uow
                    .active_run_for_thread(thread_id)?
                    .ok_or(DispatchError::NoActiveRun(thread_id))?;
                uow.finish_run(active.id, RunStatus::Cancelled, None)?;
                Ok(active.id)
            })?;

        // Fire the live cancellation token after the row is terminal so a
        // cancelled supervisor stream never resurrects the run.
        ctx.active_runs.cancel(thread_id);

        info!(
            thread_id = %thread_id,
            run_id = %run_id,
            user_id = %envelope.user_id,
            "Agent run cancelled"
        );

        ctx.notifier
            .notify_connection(
                envelope.connection_id,
                ServerMessage::AgentStopped {
                    thread_id,
                    run_id,
                    status: RunStatus::Cancelled,
                },
            )
            .await;

        Ok(())
    }
}

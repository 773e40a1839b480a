//! Handler for `start_agent`.

use async_trait::async_trait;
use tracing::info;

use parley_types::{Run, Thread};

use crate::error::DispatchError;
use crate::handler::{HandlerContext, MessageHandler};
use crate::message::{ClientMessage, ServerMessage};
use crate::queue::Envelope;

/// Begins an agent run on a thread, creating the thread if needed.
pub struct StartAgentHandler;

#[async_trait]
impl MessageHandler for StartAgentHandler {
    async fn handle_message(
        &self,
        ctx: &HandlerContext,
        envelope: &Envelope,
    ) -> Result<(), DispatchError> {
        let (thread_id, agent) = match &envelope.message {
            ClientMessage::StartAgent { thread_id, agent } => (*thread_id, agent.clone()),
            other => {
                return Err(DispatchError::Invalid(format!(
                    "StartAgentHandler received {other:?}"
                )))
            }
        };

        let user_id = envelope.user_id.clone();
        let run = ctx
            .store
            .with_unit_of_work(|uow| -> Result<Run, DispatchError> {
                let thread = match thread_id {
                    Some(id) => uow.get_thread_owned(id, &user_id)?,
                    None => {
                        let thread = Thread::new(user_id.clone());
                        uow.insert_thread(&thread)?;
                        thread
                    }
                };

                if let Some(active) = uow.active_run_for_thread(thread.id)? {
                    return Err(DispatchError::RunActive(active.thread_id));
                }

                let run = Run::new(thread.id, agent.clone());
                uow.insert_run(&run)?;
                Ok(run)
            })?;

        // The row is committed; register the live cancellation token.
        if ctx.active_runs.insert(run.thread_id, run.id).is_none() {
            return Err(DispatchError::RunActive(run.thread_id));
        }

        info!(
            thread_id = %run.thread_id,
            run_id = %run.id,
            agent = %run.agent,
            user_id = %envelope.user_id,
            "Agent run started"
        );

        ctx.notifier
            .notify_connection(
                envelope.connection_id,
                ServerMessage::AgentStarted {
                    thread_id: run.thread_id,
                    run_id: run.id,
                    agent: run.agent,
                },
            )
            .await;

        Ok(())
    }
}

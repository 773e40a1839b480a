//! Concrete handlers for the four routable message types.

mod history;
mod start_agent;
mod stop_agent;
mod user_message;

pub use history::GetThreadHistoryHandler;
pub use start_agent::StartAgentHandler;
pub use stop_agent::StopAgentHandler;
pub use user_message::UserMessageHandler;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::handler::MessageHandler;
use crate::message::HandlerKind;
use crate::registry::{HandlerFactory, HandlerKey};

/// The production handler factory: one stateless handler per message type.
///
/// Construction is infallible here; fallible factories (per-user resources,
/// quota checks) implement [`HandlerFactory`] themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandlerFactory;

#[async_trait]
impl HandlerFactory for DefaultHandlerFactory {
    async fn create(&self, key: &HandlerKey) -> Result<Arc<dyn MessageHandler>, DispatchError> {
        let handler: Arc<dyn MessageHandler> = match key.kind {
            HandlerKind::StartAgent => Arc::new(StartAgentHandler),
            HandlerKind::UserMessage => Arc::new(UserMessageHandler),
            HandlerKind::GetThreadHistory => Arc::new(GetThreadHistoryHandler),
            HandlerKind::StopAgent => Arc::new(StopAgentHandler),
        };
        Ok(handler)
    }
}

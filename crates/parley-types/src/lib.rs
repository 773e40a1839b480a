//! Shared types for the Parley chat backend.

pub mod ids;
pub mod thread;

pub use ids::{ConnectionId, MessageId, RunId, ThreadId, UserId};
pub use thread::{ChatMessage, ChatRole, Run, RunStatus, Thread};

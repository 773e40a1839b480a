//! Wire protocol types for client-server communication.

use serde::{Deserialize, Serialize};

use parley_types::{ChatMessage, RunId, RunStatus, ThreadId};

/// Messages from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Begin an agent run on a thread.
    StartAgent {
        /// Thread to run on. If not provided, a new thread is created.
        #[serde(skip_serializing_if = "Option::is_none")]
        thread_id: Option<ThreadId>,
        /// Agent name to run.
        agent: String,
    },
    /// Append a user message to a thread and stream the agent reply.
    UserMessage {
        /// Thread to post to.
        thread_id: ThreadId,
        /// The message content.
        content: String,
    },
    /// Fetch persisted messages for a thread.
    GetThreadHistory {
        /// Thread to read.
        thread_id: ThreadId,
        /// Maximum number of messages to return.
        #[serde(skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
    /// Cancel the active agent run on a thread.
    StopAgent {
        /// Thread whose run should be cancelled.
        thread_id: ThreadId,
    },
    /// Reclaim thread ownership after a disconnect.
    ResumeThread {
        /// Thread to reclaim.
        thread_id: ThreadId,
        /// Token issued when ownership was claimed.
        reconnect_token: String,
    },
    /// Ping to keep the connection alive.
    Ping,
    /// Authenticate the connection.
    Auth {
        /// Bearer token for authentication.
        token: String,
        /// Identity to act as. Defaults to the local user when omitted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
    },
}

/// Messages from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Agent run started.
    AgentStarted {
        /// Thread the run executes on.
        thread_id: ThreadId,
        /// The new run's ID.
        run_id: RunId,
        /// Agent name.
        agent: String,
    },
    /// Agent run reached a terminal state.
    AgentStopped {
        /// Thread the run executed on.
        thread_id: ThreadId,
        /// The finished run's ID.
        run_id: RunId,
        /// Terminal status.
        status: RunStatus,
    },
    /// A user message was persisted.
    MessageSaved {
        /// Thread the message belongs to.
        thread_id: ThreadId,
        /// The persisted message's ID.
        message_id: parley_types::MessageId,
    },
    /// Text chunk from the agent response.
    AgentChunk {
        /// Thread ID.
        thread_id: ThreadId,
        /// Text content.
        content: String,
        /// Whether this is the final chunk.
        done: bool,
    },
    /// Persisted messages for a thread, oldest first.
    ThreadHistory {
        /// Thread ID.
        thread_id: ThreadId,
        /// Messages in chronological order.
        messages: Vec<ChatMessage>,
    },
    /// Error occurred. This is the per-user notification channel for
    /// contained handler failures.
    Error {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
    },
    /// Thread ownership granted to this connection.
    ThreadClaimed {
        /// The owned thread.
        thread_id: ThreadId,
        /// Token that reclaims ownership after a disconnect.
        reconnect_token: String,
    },
    /// Thread ownership reclaimed with a reconnect token.
    ThreadResumed {
        /// The reclaimed thread.
        thread_id: ThreadId,
        /// Replacement token for the next disconnect.
        reconnect_token: String,
    },
    /// Pong response to ping.
    Pong,
    /// Authentication result.
    AuthResult {
        /// Whether authentication succeeded.
        success: bool,
        /// Error message if failed.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create an auth success message.
    pub fn auth_success() -> Self {
        Self::AuthResult {
            success: true,
            error: None,
        }
    }

    /// Create an auth failure message.
    pub fn auth_failure(error: impl Into<String>) -> Self {
        Self::AuthResult {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// The handler types registered with the dispatch service.
///
/// One handler kind per routable client message. `Ping`, `Auth`, and
/// `ResumeThread` are transport concerns and never reach the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// Handles `start_agent`.
    StartAgent,
    /// Handles `user_message`.
    UserMessage,
    /// Handles `get_thread_history`.
    GetThreadHistory,
    /// Handles `stop_agent`.
    StopAgent,
}

impl HandlerKind {
    /// The handler kind for a client message, or `None` for transport-level
    /// messages that are not routable.
    pub fn for_message(msg: &ClientMessage) -> Option<Self> {
        match msg {
            ClientMessage::StartAgent { .. } => Some(HandlerKind::StartAgent),
            ClientMessage::UserMessage { .. } => Some(HandlerKind::UserMessage),
            ClientMessage::GetThreadHistory { .. } => Some(HandlerKind::GetThreadHistory),
            ClientMessage::StopAgent { .. } => Some(HandlerKind::StopAgent),
            ClientMessage::ResumeThread { .. }
            | ClientMessage::Ping
            | ClientMessage::Auth { .. } => None,
        }
    }

    /// All routable handler kinds.
    pub fn all() -> [HandlerKind; 4] {
        [
            HandlerKind::StartAgent,
            HandlerKind::UserMessage,
            HandlerKind::GetThreadHistory,
            HandlerKind::StopAgent,
        ]
    }
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HandlerKind::StartAgent => "start_agent",
            HandlerKind::UserMessage => "user_message",
            HandlerKind::GetThreadHistory => "get_thread_history",
            HandlerKind::StopAgent => "stop_agent",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_parsing() {
        let json = r#"{"type": "ping"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));

        let json = r#"{"type": "auth", "token": "secret"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Auth { token, user: None } if token == "secret"));

        let json = r#"{"type": "auth", "token": "secret", "user": "alice"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Auth { user: Some(u), .. } if u == "alice"));

        let json = r#"{"type": "start_agent", "agent": "researcher"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(
            matches!(msg, ClientMessage::StartAgent { thread_id: None, agent } if agent == "researcher")
        );

        let tid = ThreadId::new();
        let json = format!(r#"{{"type": "user_message", "thread_id": "{tid}", "content": "hi"}}"#);
        let msg: ClientMessage = serde_json::from_str(&json).unwrap();
        assert!(
            matches!(msg, ClientMessage::UserMessage { thread_id, content } if thread_id == tid && content == "hi")
        );

        let json = format!(r#"{{"type": "get_thread_history", "thread_id": "{tid}"}}"#);
        let msg: ClientMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::GetThreadHistory { limit: None, .. }
        ));

        let json = format!(r#"{{"type": "stop_agent", "thread_id": "{tid}"}}"#);
        let msg: ClientMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(msg, ClientMessage::StopAgent { thread_id } if thread_id == tid));

        let json = format!(
            r#"{{"type": "resume_thread", "thread_id": "{tid}", "reconnect_token": "abc"}}"#
        );
        let msg: ClientMessage = serde_json::from_str(&json).unwrap();
        assert!(
            matches!(msg, ClientMessage::ResumeThread { thread_id, reconnect_token } if thread_id == tid && reconnect_token == "abc")
        );
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let json = r#"{"type": "drop_tables"}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }

    #[test]
    fn server_message_serialization() {
        let msg = ServerMessage::Pong;
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("pong"));

        let msg = ServerMessage::error("test_error", "Test message");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("test_error"));
        assert!(json.contains("Test message"));

        let msg = ServerMessage::AgentChunk {
            thread_id: ThreadId::new(),
            content: "hello".to_string(),
            done: false,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("agent_chunk"));
        assert!(json.contains("hello"));

        let msg = ServerMessage::auth_failure("bad token");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("auth_result"));
        assert!(json.contains("bad token"));

        let msg = ServerMessage::auth_success();
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("error"));
    }

    #[test]
    fn handler_kind_covers_routable_messages() {
        let tid = ThreadId::new();
        assert_eq!(
            HandlerKind::for_message(&ClientMessage::StopAgent { thread_id: tid }),
            Some(HandlerKind::StopAgent)
        );
        assert_eq!(HandlerKind::for_message(&ClientMessage::Ping), None);
        assert_eq!(
            HandlerKind::for_message(&ClientMessage::Auth {
                token: "t".into(),
                user: None
            }),
            None
        );
    }
}

//! Domain records: threads, messages, and agent runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, RunId, ThreadId, UserId};

/// A chat thread owned by a single user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    /// Thread identifier.
    pub id: ThreadId,
    /// Owning user. All access is scoped to this user.
    pub user_id: UserId,
    /// Optional human-readable title.
    pub title: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    /// Create a new thread for the given user.
    pub fn new(user_id: UserId) -> Self {
        Self::with_id(ThreadId::new(), user_id)
    }

    /// Create a thread with a caller-provided ID.
    pub fn with_id(id: ThreadId, user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            title: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Role of a persisted chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// Message authored by the end user.
    User,
    /// Message produced by the agent.
    Assistant,
    /// System/annotation message.
    System,
}

impl ChatRole {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::System => "system",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(ChatRole::User),
            "assistant" => Some(ChatRole::Assistant),
            "system" => Some(ChatRole::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message identifier.
    pub id: MessageId,
    /// Thread this message belongs to.
    pub thread_id: ThreadId,
    /// Author role.
    pub role: ChatRole,
    /// Message body (already sanitized at the dispatch boundary).
    pub content: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a new message in a thread.
    pub fn new(thread_id: ThreadId, role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            thread_id,
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle state of an agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is in progress.
    Running,
    /// Run finished normally.
    Completed,
    /// Run was cancelled by the user.
    Cancelled,
    /// Run terminated with an error.
    Failed,
}

impl RunStatus {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "cancelled" => Some(RunStatus::Cancelled),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    /// Whether the run is still active.
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single agent execution on a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Run identifier.
    pub id: RunId,
    /// Thread the run executes on.
    pub thread_id: ThreadId,
    /// Agent name requested by the client.
    pub agent: String,
    /// Current lifecycle state.
    pub status: RunStatus,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state, if it has.
    pub completed_at: Option<DateTime<Utc>>,
    /// Error detail for failed runs.
    pub error: Option<String>,
}

impl Run {
    /// Create a new running run for a thread.
    pub fn new(thread_id: ThreadId, agent: impl Into<String>) -> Self {
        Self {
            id: RunId::new(),
            thread_id,
            agent: agent.into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }
}

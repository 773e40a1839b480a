//! Test doubles for the dispatch service.
//!
//! Available to downstream crates via the `testing` feature, mirroring how
//! they are used by this crate's own tests.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parley_types::{ConnectionId, ThreadId, UserId};

use crate::message::ServerMessage;
use crate::notify::Notifier;
use crate::supervisor::{AgentEvent, Supervisor, SupervisorError};

/// A deterministic supervisor that replies with configured text.
///
/// The reply is split into whitespace-delimited chunks so streaming behavior
/// is exercised. Cancellation ends the stream after the current chunk.
pub struct MockSupervisor {
    reply: String,
    fail_on_start: bool,
}

impl MockSupervisor {
    /// Supervisor that streams the given reply.
    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            fail_on_start: false,
        }
    }

    /// Supervisor whose `run` always fails.
    pub fn failing() -> Self {
        Self {
            reply: String::new(),
            fail_on_start: true,
        }
    }
}

#[async_trait]
impl Supervisor for MockSupervisor {
    async fn run(
        &self,
        _thread_id: ThreadId,
        _user_id: &UserId,
        _message: &str,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, AgentEvent>, SupervisorError> {
        if self.fail_on_start {
            return Err(SupervisorError::Failed("mock supervisor refused".into()));
        }

        let words: Vec<String> = self
            .reply
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

/// A notifier that records every message it is asked to deliver.
#[derive(Clone, Default)]
pub struct ChannelNotifier {
    sent: Arc<Mutex<Vec<(ConnectionId, ServerMessage)>>>,
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<ServerMessage>>>>,
}

impl ChannelNotifier {
    /// Create a notifier that only records.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also forward every message to a channel, for tests that await delivery.
    pub fn with_channel() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = Self {
            sent: Arc::default(),
            tx: Arc::new(Mutex::new(Some(tx))),
        };
        (notifier, rx)
    }

    /// Everything delivered so far.
    pub fn sent(&self) -> Vec<(ConnectionId, ServerMessage)> {
        self.sent.lock().clone()
    }

    /// Messages delivered so far, without connection IDs.
    pub fn messages(&self) -> Vec<ServerMessage> {
        self.sent.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    fn record(&self, connection_id: ConnectionId, message: ServerMessage) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(message.clone());
        }
        self.sent.lock().push((connection_id, message));
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify_user(&self, _user_id: &UserId, message: ServerMessage) {
        // User-level fanout is a server concern; the double records it
        // against a nil connection.
        self.record(ConnectionId::from_uuid(uuid::Uuid::nil()), message);
    }

    async fn notify_connection(&self, connection_id: ConnectionId, message: ServerMessage) {
        self.record(connection_id, message);
    }
}

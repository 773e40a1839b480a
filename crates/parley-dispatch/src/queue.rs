//! Async priority queue for routed messages.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use parking_lot::Mutex;
use tokio::sync::Notify;

use parley_types::{ConnectionId, UserId};

use crate::error::DispatchError;
use crate::message::ClientMessage;
use crate::priority::Priority;

/// A routed message together with its requester identity.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// The requesting user.
    pub user_id: UserId,
    /// The connection the message arrived on.
    pub connection_id: ConnectionId,
    /// The validated, sanitized message.
    pub message: ClientMessage,
}

/// Heap entry: priority first, then FIFO within a priority level.
struct QueuedEnvelope {
    priority: Priority,
    seq: u64,
    envelope: Envelope,
}

impl PartialEq for QueuedEnvelope {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedEnvelope {}

impl PartialOrd for QueuedEnvelope {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEnvelope {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority wins, lower sequence
        // number wins within a priority level.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueInner {
    heap: BinaryHeap<QueuedEnvelope>,
    next_seq: u64,
    closed: bool,
}

/// Bounded async priority queue.
///
/// `push` is synchronous and rejects with `QueueFull` at capacity; `pop`
/// awaits until an envelope is available or the queue is closed.
pub struct MessageQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
}

impl MessageQueue {
    /// Create a queue with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueue an envelope at the given priority.
    pub fn push(&self, envelope: Envelope, priority: Priority) -> Result<(), DispatchError> {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(DispatchError::QueueClosed);
            }
            if inner.heap.len() >= self.capacity {
                return Err(DispatchError::QueueFull);
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(QueuedEnvelope {
                priority,
                seq,
                envelope,
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Dequeue the highest-priority envelope, waiting if the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Envelope> {
        loop {
            // Register for notification before checking so a push between the
            // check and the await is not lost.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(entry) = inner.heap.pop() {
                    return Some(entry.envelope);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the queue. Pending envelopes are still drained by `pop`.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Number of envelopes currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

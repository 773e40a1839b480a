//! Lazily initialized, single-flight handler registry.
//!
//! Handlers are constructed once per `(kind, user)` key. When a burst of
//! connections asks for the same key concurrently, exactly one task
//! constructs the handler; the others wait for that construction to finish
//! instead of racing to build duplicates.
//!
//! Construction happens outside the registry mutex so a slow factory for one
//! key never blocks lookups for unrelated keys. Waiters use a poll-sleep loop
//! rather than a condition variable; construction is rare and the interval is
//! short, so the simplicity wins over a wait-queue.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use parley_types::UserId;

use crate::error::DispatchError;
use crate::handler::MessageHandler;
use crate::message::HandlerKind;

/// Registry key: one handler instance per message type per user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    /// The message type the handler serves.
    pub kind: HandlerKind,
    /// The requesting user.
    pub user_id: UserId,
}

impl HandlerKey {
    /// Create a key.
    pub fn new(kind: HandlerKind, user_id: UserId) -> Self {
        Self { kind, user_id }
    }
}

/// How long a waiter sleeps between polls while another task constructs.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long a waiter will poll before giving up.
const WAIT_DEADLINE: Duration = Duration::from_secs(5);

/// Constructs handler instances on demand.
///
/// Construction may fail (missing per-user state, resource exhaustion); the
/// registry reports failure to its caller as `None`, and the caller surfaces
/// an error to the end user over the notification channel.
#[async_trait]
pub trait HandlerFactory: Send + Sync {
    /// Build a handler for the given key.
    async fn create(&self, key: &HandlerKey) -> Result<Arc<dyn MessageHandler>, DispatchError>;
}

struct RegistryInner {
    handlers: HashMap<HandlerKey, Arc<dyn MessageHandler>>,
    in_progress: HashSet<HandlerKey>,
}

/// Thread-safe lazily initialized handler registry.
pub struct HandlerRegistry {
    inner: Mutex<RegistryInner>,
    poll_interval: Duration,
    wait_deadline: Duration,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Create an empty registry with default wait parameters.
    pub fn new() -> Self {
        Self::with_wait(POLL_INTERVAL, WAIT_DEADLINE)
    }

    /// Create a registry with custom poll interval and deadline (for tests).
    pub fn with_wait(poll_interval: Duration, wait_deadline: Duration) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                handlers: HashMap::new(),
                in_progress: HashSet::new(),
            }),
            poll_interval,
            wait_deadline,
        }
    }

    /// Get the handler for a key, constructing it on first use.
    ///
    /// Concurrent requests for the same key coalesce onto one construction.
    /// Returns `None` when construction fails (or a waiter times out); the
    /// caller must treat `None` as "could not create handler" and notify the
    /// end user rather than retry in a loop.
    pub async fn get_or_create(
        &self,
        key: &HandlerKey,
        factory: &dyn HandlerFactory,
    ) -> Option<Arc<dyn MessageHandler>> {
        {
            let mut inner = self.inner.lock().await;
            if let Some(handler) = inner.handlers.get(key) {
                return Some(Arc::clone(handler));
            }
            if inner.in_progress.contains(key) {
                drop(inner);
                return self.wait_for_construction(key).await;
            }
            // We construct. Mark the key so concurrent requesters wait.
            inner.in_progress.insert(key.clone());
        }

        // Construction runs outside the mutex so other keys proceed.
        let constructed = factory.create(key).await;

        let mut inner = self.inner.lock().await;
        inner.in_progress.remove(key);

        match constructed {
            Ok(handler) => {
                debug!(kind = %key.kind, user_id = %key.user_id, "Handler constructed");
                // Double check: keep an instance a concurrent winner may have
                // inserted while we were constructing.
                let entry = inner
                    .handlers
                    .entry(key.clone())
                    .or_insert_with(|| Arc::clone(&handler));
                Some(Arc::clone(entry))
            }
            Err(e) => {
                warn!(
                    kind = %key.kind,
                    user_id = %key.user_id,
                    error = %e,
                    "Handler construction failed"
                );
                None
            }
        }
    }

    /// Poll until the in-flight construction for `key` resolves.
    async fn wait_for_construction(&self, key: &HandlerKey) -> Option<Arc<dyn MessageHandler>> {
        let deadline = Instant::now() + self.wait_deadline;
        loop {
            sleep(self.poll_interval).await;

            let inner = self.inner.lock().await;
            if let Some(handler) = inner.handlers.get(key) {
                return Some(Arc::clone(handler));
            }
            // Marker cleared without a handler appearing: construction failed.
            if !inner.in_progress.contains(key) {
                return None;
            }
            drop(inner);

            if Instant::now() >= deadline {
                warn!(
                    kind = %key.kind,
                    user_id = %key.user_id,
                    "Timed out waiting for handler construction"
                );
                return None;
            }
        }
    }

    /// Number of constructed handlers.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.handlers.len()
    }

    /// Whether the registry holds no handlers.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop all handlers for a user (e.g. when their last connection closes).
    pub async fn remove_user(&self, user_id: &UserId) -> usize {
        let mut inner = self.inner.lock().await;
        let before = inner.handlers.len();
        inner.handlers.retain(|key, _| key.user_id != *user_id);
        before - inner.handlers.len()
    }
}

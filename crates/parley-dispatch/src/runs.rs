//! Tracking of in-flight agent runs and their cancellation tokens.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use parley_types::{RunId, ThreadId};

/// An in-flight run entry.
#[derive(Debug, Clone)]
pub struct ActiveRun {
    /// The run's ID (matches the persisted `runs` row).
    pub run_id: RunId,
    /// Token that cancels the run's supervisor stream.
    pub cancel: CancellationToken,
}

/// Shared map of active runs, one at most per thread.
///
/// The database row is the source of truth for run state; this map only holds
/// the live cancellation token, which cannot be persisted.
#[derive(Clone, Default)]
pub struct ActiveRuns {
    inner: Arc<Mutex<HashMap<ThreadId, ActiveRun>>>,
}

impl ActiveRuns {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run for a thread, returning its cancellation token.
    ///
    /// Returns `None` if the thread already has an active run.
    pub fn insert(&self, thread_id: ThreadId, run_id: RunId) -> Option<CancellationToken> {
        let mut inner = self.inner.lock();
        if inner.contains_key(&thread_id) {
            return None;
        }
        let cancel = CancellationToken::new();
        inner.insert(
            thread_id,
            ActiveRun {
                run_id,
                cancel: cancel.clone(),
            },
        );
        Some(cancel)
    }

    /// Get the active run entry for a thread.
    pub fn get(&self, thread_id: ThreadId) -> Option<ActiveRun> {
        self.inner.lock().get(&thread_id).cloned()
    }

    /// Remove and return the active run for a thread, without cancelling it.
    pub fn remove(&self, thread_id: ThreadId) -> Option<ActiveRun> {
        self.inner.lock().remove(&thread_id)
    }

    /// Remove the active run for a thread and fire its cancellation token.
    pub fn cancel(&self, thread_id: ThreadId) -> Option<ActiveRun> {
        let entry = self.remove(thread_id)?;
        entry.cancel.cancel();
        Some(entry)
    }

    /// Number of active runs.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no runs are active.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

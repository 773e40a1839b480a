//! Thread ownership registry.
//!
//! The first connection to mutate a thread becomes its owner; only the owner
//! may mutate it afterwards. When the owning connection drops, ownership
//! converts to a *pending reconnect*: a one-time token held for a grace
//! period, during which a reconnecting client presenting the token reclaims
//! the thread. Expired entries are cleaned up lazily on the next claim or
//! resume touching the registry.
//!
//! Entries are keyed by `(user, thread)`, so ownership only arbitrates
//! between connections of the same user. Whether a user may touch a thread
//! at all is tenancy, enforced in the store; a claim by one user never
//! shadows another user's thread.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use parley_types::{ConnectionId, ThreadId, UserId};

/// Outcome of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The connection is now the owner; the token reclaims ownership after a
    /// disconnect.
    Granted { reconnect_token: String },
    /// The connection already owns the thread.
    AlreadyOwner,
    /// Another connection of the same user owns the thread, or it is
    /// reserved for a pending reconnect.
    Denied,
}

struct PendingReconnect {
    token: String,
    expires_at: Instant,
}

#[derive(Default)]
struct OwnershipInner {
    owners: HashMap<(UserId, ThreadId), ConnectionId>,
    pending: HashMap<(UserId, ThreadId), PendingReconnect>,
}

/// Shared registry of thread owners and pending reconnects.
#[derive(Clone)]
pub struct ThreadOwnership {
    inner: Arc<Mutex<OwnershipInner>>,
    grace_period: Duration,
}

impl ThreadOwnership {
    /// Create a registry with the given reconnect grace period.
    pub fn new(grace_period: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OwnershipInner::default())),
            grace_period,
        }
    }

    /// Attempt to claim a thread for one of a user's connections.
    ///
    /// Grants ownership when the thread is unowned and not reserved for a
    /// pending reconnect.
    pub fn try_claim(
        &self,
        user_id: &UserId,
        thread_id: ThreadId,
        connection_id: ConnectionId,
    ) -> Claim {
        let mut inner = self.inner.lock();
        Self::cleanup_expired(&mut inner);

        let key = (user_id.clone(), thread_id);
        if let Some(owner) = inner.owners.get(&key) {
            return if *owner == connection_id {
                Claim::AlreadyOwner
            } else {
                Claim::Denied
            };
        }
        if inner.pending.contains_key(&key) {
            return Claim::Denied;
        }

        let token = Uuid::new_v4().to_string();
        inner.owners.insert(key, connection_id);
        Claim::Granted {
            reconnect_token: token,
        }
    }

    /// Whether the connection currently owns the thread for this user.
    pub fn is_owner(
        &self,
        user_id: &UserId,
        thread_id: ThreadId,
        connection_id: ConnectionId,
    ) -> bool {
        self.inner.lock().owners.get(&(user_id.clone(), thread_id)) == Some(&connection_id)
    }

    /// Release ownership without creating a pending reconnect.
    ///
    /// No-op unless the connection is the owner.
    pub fn release(&self, user_id: &UserId, thread_id: ThreadId, connection_id: ConnectionId) {
        let mut inner = self.inner.lock();
        let key = (user_id.clone(), thread_id);
        if inner.owners.get(&key) == Some(&connection_id) {
            inner.owners.remove(&key);
        }
    }

    /// Release every thread owned by a disconnecting connection.
    ///
    /// Threads with a reconnect token become pending reconnects for the
    /// grace period; the rest are simply released.
    pub fn release_all(
        &self,
        connection_id: ConnectionId,
        reconnect_tokens: &HashMap<ThreadId, String>,
    ) {
        let mut inner = self.inner.lock();
        let owned: Vec<(UserId, ThreadId)> = inner
            .owners
            .iter()
            .filter(|(_, owner)| **owner == connection_id)
            .map(|(key, _)| key.clone())
            .collect();

        let expires_at = Instant::now() + self.grace_period;
        for key in owned {
            inner.owners.remove(&key);
            if let Some(token) = reconnect_tokens.get(&key.1) {
                inner.pending.insert(
                    key,
                    PendingReconnect {
                        token: token.clone(),
                        expires_at,
                    },
                );
            }
        }
    }

    /// Reclaim a thread with a reconnect token.
    ///
    /// On success the pending entry is consumed, the connection becomes the
    /// owner, and a fresh token is returned for the next disconnect. Returns
    /// `None` if the token does not match, the grace period has elapsed, or
    /// the pending entry belongs to another user.
    pub fn try_reclaim(
        &self,
        user_id: &UserId,
        thread_id: ThreadId,
        token: &str,
        connection_id: ConnectionId,
    ) -> Option<String> {
        let mut inner = self.inner.lock();
        Self::cleanup_expired(&mut inner);

        let key = (user_id.clone(), thread_id);
        match inner.pending.get(&key) {
            Some(pending) if pending.token == token => {}
            _ => return None,
        }

        inner.pending.remove(&key);
        let new_token = Uuid::new_v4().to_string();
        inner.owners.insert(key, connection_id);
        Some(new_token)
    }

    /// Whether the thread is reserved for a pending reconnect by this user.
    pub fn has_pending(&self, user_id: &UserId, thread_id: ThreadId) -> bool {
        let mut inner = self.inner.lock();
        Self::cleanup_expired(&mut inner);
        inner.pending.contains_key(&(user_id.clone(), thread_id))
    }

    fn cleanup_expired(inner: &mut OwnershipInner) {
        let now = Instant::now();
        inner.pending.retain(|_, p| p.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ThreadOwnership {
        ThreadOwnership::new(Duration::from_secs(30))
    }

    fn user(name: &str) -> UserId {
        UserId::new(name)
    }

    #[test]
    fn first_claimer_becomes_owner() {
        let ownership = registry();
        let alice = user("alice");
        let thread = ThreadId::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        assert!(matches!(
            ownership.try_claim(&alice, thread, a),
            Claim::Granted { .. }
        ));
        assert_eq!(ownership.try_claim(&alice, thread, a), Claim::AlreadyOwner);
        assert_eq!(ownership.try_claim(&alice, thread, b), Claim::Denied);
        assert!(ownership.is_owner(&alice, thread, a));
        assert!(!ownership.is_owner(&alice, thread, b));
    }

    #[test]
    fn claims_are_scoped_per_user() {
        let ownership = registry();
        let alice = user("alice");
        let mallory = user("mallory");
        let thread = ThreadId::new();
        let alice_conn = ConnectionId::new();
        let mallory_conn = ConnectionId::new();

        // Another user claiming the same thread ID never shadows the
        // legitimate owner's claim.
        assert!(matches!(
            ownership.try_claim(&mallory, thread, mallory_conn),
            Claim::Granted { .. }
        ));
        assert!(matches!(
            ownership.try_claim(&alice, thread, alice_conn),
            Claim::Granted { .. }
        ));
        assert!(ownership.is_owner(&alice, thread, alice_conn));
        assert!(ownership.is_owner(&mallory, thread, mallory_conn));
    }

    #[test]
    fn disconnect_reserves_thread_for_grace_period() {
        let ownership = registry();
        let alice = user("alice");
        let thread = ThreadId::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        let Claim::Granted { reconnect_token } = ownership.try_claim(&alice, thread, a) else {
            panic!("expected grant");
        };

        let mut tokens = HashMap::new();
        tokens.insert(thread, reconnect_token);
        ownership.release_all(a, &tokens);

        // Reserved: a newcomer cannot claim while the reconnect is pending.
        assert!(ownership.has_pending(&alice, thread));
        assert_eq!(ownership.try_claim(&alice, thread, b), Claim::Denied);
    }

    #[test]
    fn token_reclaims_ownership_once() {
        let ownership = registry();
        let alice = user("alice");
        let thread = ThreadId::new();
        let a = ConnectionId::new();
        let a2 = ConnectionId::new();

        let Claim::Granted { reconnect_token } = ownership.try_claim(&alice, thread, a) else {
            panic!("expected grant");
        };
        let mut tokens = HashMap::new();
        tokens.insert(thread, reconnect_token.clone());
        ownership.release_all(a, &tokens);

        let new_token = ownership
            .try_reclaim(&alice, thread, &reconnect_token, a2)
            .expect("reclaim should succeed");
        assert_ne!(new_token, reconnect_token);
        assert!(ownership.is_owner(&alice, thread, a2));

        // The old token is consumed.
        assert!(ownership
            .try_reclaim(&alice, thread, &reconnect_token, ConnectionId::new())
            .is_none());
    }

    #[test]
    fn wrong_token_is_rejected() {
        let ownership = registry();
        let alice = user("alice");
        let thread = ThreadId::new();
        let a = ConnectionId::new();

        let Claim::Granted { reconnect_token } = ownership.try_claim(&alice, thread, a) else {
            panic!("expected grant");
        };
        let mut tokens = HashMap::new();
        tokens.insert(thread, reconnect_token.clone());
        ownership.release_all(a, &tokens);

        assert!(ownership
            .try_reclaim(&alice, thread, "not-the-token", ConnectionId::new())
            .is_none());
        // A valid token presented under another identity fails too.
        assert!(ownership
            .try_reclaim(&user("mallory"), thread, &reconnect_token, ConnectionId::new())
            .is_none());
        assert!(ownership.has_pending(&alice, thread));
    }

    #[test]
    fn expired_pending_reconnect_is_cleaned_up() {
        let ownership = ThreadOwnership::new(Duration::ZERO);
        let alice = user("alice");
        let thread = ThreadId::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        let Claim::Granted { reconnect_token } = ownership.try_claim(&alice, thread, a) else {
            panic!("expected grant");
        };
        let mut tokens = HashMap::new();
        tokens.insert(thread, reconnect_token.clone());
        ownership.release_all(a, &tokens);

        // Grace period already elapsed: the token is dead and the thread is
        // claimable again.
        assert!(!ownership.has_pending(&alice, thread));
        assert!(ownership
            .try_reclaim(&alice, thread, &reconnect_token, b)
            .is_none());
        assert!(matches!(
            ownership.try_claim(&alice, thread, b),
            Claim::Granted { .. }
        ));
    }

    #[test]
    fn release_without_token_frees_thread_immediately() {
        let ownership = registry();
        let alice = user("alice");
        let thread = ThreadId::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        assert!(matches!(
            ownership.try_claim(&alice, thread, a),
            Claim::Granted { .. }
        ));
        ownership.release(&alice, thread, a);

        assert!(!ownership.has_pending(&alice, thread));
        assert!(matches!(
            ownership.try_claim(&alice, thread, b),
            Claim::Granted { .. }
        ));
    }
}

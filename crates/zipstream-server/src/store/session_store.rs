use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::Session;

/// Token-keyed registry of pending sessions.
///
/// Lookups share a read lock; inserts and deletes take the write lock.
/// Records are never updated in place.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session and return its download token.
    ///
    /// The caller is responsible for rejecting an empty member list.
    pub fn create(&self, member_urls: Vec<String>, archive_name: String) -> String {
        let mut map = self.sessions.write();
        loop {
            // v4 UUIDs come from the OS RNG, so tokens are not guessable
            let token = Uuid::new_v4().to_string();
            if let Entry::Vacant(slot) = map.entry(token.clone()) {
                slot.insert(Session {
                    token: token.clone(),
                    member_urls,
                    archive_name,
                    created_at: Instant::now(),
                });
                return token;
            }
        }
    }

    /// Owned copy of a session. TTL is not checked here.
    pub fn lookup(&self, token: &str) -> Option<Session> {
        self.sessions.read().get(token).cloned()
    }

    /// Remove a session. Returns whether it was present.
    pub fn delete(&self, token: &str) -> bool {
        self.sessions.write().remove(token).is_some()
    }

    pub fn is_expired(session: &Session, ttl: Duration) -> bool {
        session.created_at.elapsed() > ttl
    }

    /// Tokens of every session older than `ttl`, collected under the read lock.
    pub fn expired_tokens(&self, ttl: Duration) -> Vec<String> {
        let now = Instant::now();
        self.sessions
            .read()
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.created_at) > ttl)
            .map(|(token, _)| token.clone())
            .collect()
    }

    /// Evict expired sessions: scan under the read lock, then delete under the
    /// write lock. Returns the number of sessions removed.
    pub fn sweep_expired(&self, ttl: Duration) -> usize {
        let expired = self.expired_tokens(ttl);
        if expired.is_empty() {
            return 0;
        }

        let mut map = self.sessions.write();
        expired
            .iter()
            .filter(|token| map.remove(token.as_str()).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

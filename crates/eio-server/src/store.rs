//! Session store and id generation.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;
use uuid::Uuid;

use crate::session::{Session, SessionOwner, SessionState};

/// Produces ids for new sessions. Ids must be unique among live sessions.
pub trait SessionIdGenerator: Send + Sync + 'static {
    fn generate(&self) -> String;
}

/// Random v4 UUIDs, hyphens stripped.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl SessionIdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Live sessions by id.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session under its own id. Returns false if the id is taken.
    pub fn insert(&self, session: Arc<Session>) -> bool {
        match self.sessions.entry(session.id().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Close every live session.
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();
        for session in sessions {
            session.close().await;
        }
    }
}

impl SessionOwner for SessionStore {
    fn on_session_closed(&self, id: &str) {
        if self
            .sessions
            .remove_if(id, |_, session| session.state() == SessionState::Closed)
            .is_some()
        {
            debug!("Removed session {id}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_are_unique_hex() {
        let a = UuidGenerator.generate();
        let b = UuidGenerator.generate();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn empty_store() {
        let store = SessionStore::new();
        assert!(store.is_empty());
        assert!(store.get("nope").is_none());
        assert!(store.remove("nope").is_none());
        store.on_session_closed("nope");
        assert!(store.ids().is_empty());
    }
}

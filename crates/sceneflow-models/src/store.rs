//! Session store boundary
//!
//! The orchestration core only needs get/set semantics; durable persistence
//! is an external concern and stays behind this trait.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::session::ProductionSession;

/// Storage boundary for production sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session record by id.
    async fn get(&self, session_id: &str) -> Option<ProductionSession>;

    /// Store (or replace) a session record.
    async fn set(&self, session_id: &str, record: ProductionSession);
}

/// In-memory session store for single-process runs.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, ProductionSession>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Option<ProductionSession> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    async fn set(&self, session_id: &str, record: ProductionSession) {
        self.sessions.insert(session_id.to_string(), record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_returns_none_for_absent_session() {
        let store = InMemorySessionStore::new();
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let store = InMemorySessionStore::new();
        let mut record = ProductionSession::new("sess-1");
        record.title = Some("demo".to_string());
        store.set("sess-1", record).await;

        let fetched = store.get("sess-1").await.expect("record should exist");
        assert_eq!(fetched.session_id, "sess-1");
        assert_eq!(fetched.title.as_deref(), Some("demo"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_set_replaces_existing_record() {
        let store = InMemorySessionStore::new();
        store.set("sess-1", ProductionSession::new("sess-1")).await;

        let mut updated = ProductionSession::new("sess-1");
        updated.lyrics = Some("verse one".to_string());
        updated.touch();
        store.set("sess-1", updated).await;

        let fetched = store.get("sess-1").await.expect("record should exist");
        assert_eq!(fetched.version, 1);
        assert_eq!(fetched.lyrics.as_deref(), Some("verse one"));
    }
}

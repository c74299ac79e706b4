//! Observable session-state store.
//!
//! Simple key/value store for session fields pushed by the server
//! (active document, connected users, permissions). Observers take an
//! explicit subscription stream instead of registering listeners; each
//! change is broadcast as a [`SessionChange`] and slow subscribers lag
//! rather than block the writer.

use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

/// A single field change, emitted once per observed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    pub field: String,
    pub value: String,
    /// Value before this change, if the field existed.
    pub previous: Option<String>,
}

/// Key/value store with change notification.
pub struct SessionStore {
    fields: RwLock<HashMap<String, String>>,
    change_tx: broadcast::Sender<SessionChange>,
}

impl SessionStore {
    /// Create a store whose subscription stream buffers up to
    /// `channel_capacity` undelivered changes per subscriber.
    pub fn new(channel_capacity: usize) -> Self {
        let (change_tx, _) = broadcast::channel(channel_capacity);
        Self {
            fields: RwLock::new(HashMap::new()),
            change_tx,
        }
    }

    /// Set a field, notifying subscribers only on an actual transition.
    pub async fn set(&self, field: impl Into<String>, value: impl Into<String>) {
        let field = field.into();
        let value = value.into();
        let previous = {
            let mut fields = self.fields.write().await;
            if fields.get(&field).is_some_and(|current| *current == value) {
                return;
            }
            fields.insert(field.clone(), value.clone())
        };
        // No subscribers is fine; changes are only observable state.
        let _ = self.change_tx.send(SessionChange {
            field,
            value,
            previous,
        });
    }

    /// Current value of a field.
    pub async fn get(&self, field: &str) -> Option<String> {
        self.fields.read().await.get(field).cloned()
    }

    /// Subscribe to the change stream. Changes made before this call are
    /// not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.change_tx.subscribe()
    }

    /// Snapshot of all fields.
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.fields.read().await.clone()
    }

    /// Number of fields present.
    pub async fn len(&self) -> usize {
        self.fields.read().await.len()
    }

    /// Whether no fields are present.
    pub async fn is_empty(&self) -> bool {
        self.fields.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = SessionStore::new(16);
        assert!(store.get("user").await.is_none());

        store.set("user", "alice").await;
        assert_eq!(store.get("user").await.as_deref(), Some("alice"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_subscriber_sees_changes_in_order() {
        let store = SessionStore::new(16);
        let mut changes = store.subscribe();

        store.set("doc", "a.txt").await;
        store.set("doc", "b.txt").await;

        let first = changes.recv().await.unwrap();
        assert_eq!(first.field, "doc");
        assert_eq!(first.value, "a.txt");
        assert_eq!(first.previous, None);

        let second = changes.recv().await.unwrap();
        assert_eq!(second.value, "b.txt");
        assert_eq!(second.previous.as_deref(), Some("a.txt"));
    }

    #[tokio::test]
    async fn test_unchanged_value_emits_nothing() {
        let store = SessionStore::new(16);
        let mut changes = store.subscribe();

        store.set("doc", "a.txt").await;
        store.set("doc", "a.txt").await;
        store.set("doc", "b.txt").await;

        assert_eq!(changes.recv().await.unwrap().value, "a.txt");
        // The duplicate set was suppressed: next change is the real one.
        assert_eq!(changes.recv().await.unwrap().value, "b.txt");
    }

    #[tokio::test]
    async fn test_set_without_subscribers() {
        let store = SessionStore::new(16);
        store.set("doc", "a.txt").await;
        assert_eq!(store.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_changes() {
        let store = SessionStore::new(16);
        store.set("doc", "a.txt").await;

        let mut changes = store.subscribe();
        store.set("doc", "b.txt").await;

        let change = changes.recv().await.unwrap();
        assert_eq!(change.value, "b.txt");
    }
}

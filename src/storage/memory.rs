use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::models::{Event, NewEvent};
use crate::storage::{EventStore, StoreError, StoreResult};
use crate::supervisor::{ConnectionState, ConnectionStateHandle};

/// In-memory event log (for development and testing)
#[derive(Clone)]
pub struct InMemoryEventStore {
    events: Arc<Mutex<Vec<Event>>>,
    closed: Arc<AtomicBool>,
    state: ConnectionStateHandle,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        let state = ConnectionStateHandle::new("store");
        state.set(ConnectionState::Connected);
        Self::with_state(state)
    }

    pub fn with_state(state: ConnectionStateHandle) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            state,
        }
    }

    /// Snapshot of every stored event, in insertion order
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert(&self, event: &NewEvent) -> StoreResult<Event> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }

        let stored = event.clone().persisted(Utc::now());
        self.events.lock().push(stored.clone());

        tracing::debug!(event_type = %stored.event_type, source = %stored.source, "Event saved");
        Ok(stored)
    }

    fn connection_state(&self) -> &ConnectionStateHandle {
        &self.state
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventPayload, Severity};

    #[tokio::test]
    async fn test_insert_assigns_timestamp() {
        let store = InMemoryEventStore::new();
        let before = Utc::now();

        let event = store
            .insert(&NewEvent::from(EventPayload::default()))
            .await
            .unwrap();

        assert!(event.created_at >= before);
        assert_eq!(event.severity, Severity::Info);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_after_close_fails() {
        let store = InMemoryEventStore::new();
        store.close().await;

        let result = store.insert(&NewEvent::from(EventPayload::default())).await;
        assert_eq!(result.unwrap_err(), StoreError::Closed);
        assert!(store.is_empty());
    }
}

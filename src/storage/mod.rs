//! Durable event store
//!
//! Each successful insert appends exactly one row to the `events` table. A
//! single statement is atomic, so a failed insert leaves nothing behind.

mod config;
mod error;
mod memory;
mod postgres;

pub use config::{StoreBackend, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryEventStore;
pub use postgres::{PostgresEventStore, INSERT_EVENT};

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{Event, NewEvent};
use crate::supervisor::ConnectionStateHandle;

/// Trait for event log storage operations
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event; returns the row with its server-assigned timestamp
    async fn insert(&self, event: &NewEvent) -> StoreResult<Event>;

    /// State of the underlying connection pool
    fn connection_state(&self) -> &ConnectionStateHandle;

    /// Close the pool. Later inserts fail.
    async fn close(&self);
}

/// Open the store selected by configuration (one attempt)
pub async fn connect_store(
    config: &StoreConfig,
    state: ConnectionStateHandle,
) -> StoreResult<Arc<dyn EventStore>> {
    match config.backend {
        StoreBackend::Postgres => {
            tracing::info!(max_pool_size = config.max_pool_size, "Initializing PostgreSQL event store");
            let store = PostgresEventStore::connect(config, state).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory event store; events are lost on exit");
            Ok(Arc::new(InMemoryEventStore::with_state(state)))
        }
    }
}

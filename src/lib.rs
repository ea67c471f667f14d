//! Event ingestion worker.
//!
//! Consumes operational events (deployment and status notifications) from a
//! durable broker queue and appends them to the `events` table, acknowledging
//! each delivery only after the row is committed.
//!
//! ```text
//!  broker ──► BoundedConsumer ──► MessageProcessor ──► EventStore
//!                 ▲   │ ack / requeue                    (PostgreSQL)
//!                 │   ▼
//!         ShutdownCoordinator (signal → drain → close broker → close store)
//! ```

pub mod api;
pub mod config;
pub mod consumer;
pub mod error;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod processing;
pub mod shutdown;
pub mod storage;
pub mod supervisor;
pub mod worker;

pub use error::{AppError, Result};

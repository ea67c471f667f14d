//! Broker binding for the ingestion worker
//!
//! Deliveries arrive as [`InboundMessage`]s. Splitting one with
//! [`InboundMessage::into_parts`] yields the body and a [`DeliveryGuard`], the
//! only way to ack, requeue or reject the delivery. The guard is consumed by
//! resolution; dropping it unresolved leaves the message to be redelivered.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              Bounded consumer                    │
//! └─────────────────────────────────────────────────┘
//!                      │ subscribe / resolve
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │   QueueSubscriber · Acknowledger · DeadLetterSink│
//! └─────────────────────────────────────────────────┘
//!           │                        │
//!           ▼                        ▼
//! ┌──────────────────┐    ┌──────────────────┐
//! │ NATS JetStream   │    │ In-memory queue  │
//! ├──────────────────┤    ├──────────────────┤
//! │ - Work queue     │    │ - Local runs     │
//! │ - Explicit acks  │    │ - Tests          │
//! └──────────────────┘    └──────────────────┘
//! ```

mod config;
mod error;
mod memory;
mod message;
mod nats;
mod traits;

pub use config::{NatsConfig, QueueSpec};
pub use error::{MessagingError, MessagingResult};
pub use memory::{DeadLetter, InMemoryBroker, Resolution};
pub use message::{DeliveryGuard, DeliveryMetadata, Disposition, InboundMessage};
pub use nats::{NatsBroker, DEAD_LETTER_DELIVERIES_HEADER, DEAD_LETTER_REASON_HEADER};
pub use traits::{Acknowledger, DeadLetterSink, DeliveryStream, QueueSubscriber};

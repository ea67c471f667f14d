//! Bounded consumer
//!
//! Subscribes to the durable queue and hands each delivery to the
//! [`MessageProcessor`](crate::processing::MessageProcessor), never more than
//! `prefetch` at a time. Every delivery is resolved exactly once:
//!
//! | Outcome                                   | Resolution            |
//! |-------------------------------------------|-----------------------|
//! | event persisted                           | ack                   |
//! | store error                               | requeue               |
//! | malformed payload                         | requeue               |
//! | malformed, delivered `dead_letter_after`+ | dead-letter, reject   |
//! | processing panicked                       | requeue               |
//!
//! Deliveries still in flight when shutdown gives up are never resolved and
//! are redelivered by the broker.

mod bounded;

pub use bounded::{should_dead_letter, BoundedConsumer, ConsumerOptions, ConsumerSummary};

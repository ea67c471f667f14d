//! Messaging trait abstractions

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::messaging::config::QueueSpec;
use crate::messaging::error::MessagingResult;
use crate::messaging::message::{DeliveryMetadata, Disposition, InboundMessage};
use crate::supervisor::ConnectionStateHandle;

/// Stream of deliveries from one subscription
pub type DeliveryStream = BoxStream<'static, MessagingResult<InboundMessage>>;

/// Broker-side half of a delivery handle.
///
/// Taking `self` by box means a handle cannot be resolved twice.
#[async_trait]
pub trait Acknowledger: Send {
    /// Ack, requeue or reject the delivery
    async fn resolve(self: Box<Self>, disposition: Disposition) -> MessagingResult<()>;
}

/// Source of deliveries for a durable queue
#[async_trait]
pub trait QueueSubscriber: Send + Sync {
    /// Declare the queue (idempotently) and start receiving deliveries with at
    /// most `queue.prefetch` unacknowledged at a time
    async fn subscribe(&self, queue: &QueueSpec) -> MessagingResult<DeliveryStream>;

    /// State of the underlying broker connection
    fn connection_state(&self) -> &ConnectionStateHandle;

    /// Close the broker connection
    async fn close(&self) -> MessagingResult<()>;
}

/// Destination for messages that will never process successfully
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(
        &self,
        payload: Bytes,
        metadata: &DeliveryMetadata,
        reason: &str,
    ) -> MessagingResult<()>;
}

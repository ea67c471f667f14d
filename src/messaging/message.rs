//! Inbound deliveries and their handles

use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use tracing::warn;

use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::traits::Acknowledger;
use crate::metrics::DELIVERIES_UNRESOLVED_TOTAL;

/// How a delivery is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Disposition {
    /// Processed; remove from the queue
    Ack,
    /// Failed; return to the queue for redelivery
    Requeue,
    /// Never redeliver (only used once the payload has been dead-lettered)
    Reject,
}

/// Broker-assigned delivery information
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryMetadata {
    pub subject: String,
    /// 1 on first delivery, incremented by the broker on each redelivery
    pub delivery_count: u64,
}

impl DeliveryMetadata {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// A message delivered by the broker, not yet resolved
pub struct InboundMessage {
    payload: Bytes,
    metadata: DeliveryMetadata,
    acker: Box<dyn Acknowledger>,
}

impl InboundMessage {
    pub fn new(payload: Bytes, metadata: DeliveryMetadata, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            payload,
            metadata,
            acker,
        }
    }

    pub fn metadata(&self) -> &DeliveryMetadata {
        &self.metadata
    }

    /// Split into the body and a guard owning the delivery handle
    pub fn into_parts(self) -> (Bytes, DeliveryMetadata, DeliveryGuard) {
        let guard = DeliveryGuard {
            acker: Some(self.acker),
            subject: self.metadata.subject.clone(),
            delivery_count: self.metadata.delivery_count,
        };
        (self.payload, self.metadata, guard)
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("payload_len", &self.payload.len())
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Scoped ownership of a delivery handle.
///
/// [`resolve`](DeliveryGuard::resolve) consumes the guard, so a handle is
/// resolved at most once. A guard dropped unresolved leaves the delivery
/// unacknowledged; the broker redelivers it once its ack deadline passes or
/// the connection closes.
pub struct DeliveryGuard {
    acker: Option<Box<dyn Acknowledger>>,
    subject: String,
    delivery_count: u64,
}

impl DeliveryGuard {
    pub async fn resolve(mut self, disposition: Disposition) -> MessagingResult<()> {
        let acker = self.acker.take().ok_or(MessagingError::AlreadyResolved)?;
        acker.resolve(disposition).await
    }
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        if self.acker.is_some() {
            DELIVERIES_UNRESOLVED_TOTAL.inc();
            warn!(
                subject = %self.subject,
                delivery_count = self.delivery_count,
                "Delivery released without ack or nack; broker will redeliver"
            );
        }
    }
}

impl fmt::Debug for DeliveryGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryGuard")
            .field("subject", &self.subject)
            .field("delivery_count", &self.delivery_count)
            .field("resolved", &self.acker.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct RecordingAcker(Arc<Mutex<Vec<Disposition>>>);

    #[async_trait]
    impl Acknowledger for RecordingAcker {
        async fn resolve(self: Box<Self>, disposition: Disposition) -> MessagingResult<()> {
            self.0.lock().push(disposition);
            Ok(())
        }
    }

    fn message(log: &Arc<Mutex<Vec<Disposition>>>) -> InboundMessage {
        InboundMessage::new(
            Bytes::from_static(b"{}"),
            DeliveryMetadata {
                subject: "events".to_string(),
                delivery_count: 1,
            },
            Box::new(RecordingAcker(log.clone())),
        )
    }

    #[tokio::test]
    async fn test_guard_resolves_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (payload, metadata, guard) = message(&log).into_parts();

        assert_eq!(payload, Bytes::from_static(b"{}"));
        assert!(!metadata.is_redelivery());

        guard.resolve(Disposition::Ack).await.unwrap();
        assert_eq!(*log.lock(), vec![Disposition::Ack]);
    }

    #[test]
    fn test_dropped_guard_does_not_resolve() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let before = DELIVERIES_UNRESOLVED_TOTAL.get();

        let (_, _, guard) = message(&log).into_parts();
        drop(guard);

        assert!(log.lock().is_empty());
        assert!(DELIVERIES_UNRESOLVED_TOTAL.get() > before);
    }
}

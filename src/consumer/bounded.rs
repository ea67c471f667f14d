use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::{AppError, Result};
use crate::messaging::{
    DeadLetterSink, DeliveryMetadata, DeliveryStream, Disposition, InboundMessage, QueueSpec,
    QueueSubscriber,
};
use crate::metrics::{
    MESSAGES_ACKED_TOTAL, MESSAGES_DEAD_LETTERED_TOTAL, MESSAGES_IN_FLIGHT,
    MESSAGES_RECEIVED_TOTAL, MESSAGES_REQUEUED_TOTAL, PROCESSING_DURATION_SECONDS,
    RESOLUTION_FAILURES_TOTAL,
};
use crate::models::Event;
use crate::processing::{MessageProcessor, ProcessingError};
use crate::supervisor::{connect_with_retry, ConnectionError, RetryPolicy};

/// Consumer settings
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub queue: QueueSpec,
    /// Dead-letter a malformed payload once it has been delivered this many
    /// times. `None` requeues forever.
    pub dead_letter_after: Option<u64>,
    /// Policy for (re)establishing the subscription
    pub resubscribe: RetryPolicy,
}

impl ConsumerOptions {
    pub fn new(queue: QueueSpec) -> Self {
        Self {
            queue,
            dead_letter_after: None,
            resubscribe: RetryPolicy::default(),
        }
    }

    pub fn prefetch(&self) -> usize {
        self.queue.prefetch.max(1)
    }
}

/// Whether a malformed payload on its `delivery_count`-th delivery should be
/// dead-lettered
pub fn should_dead_letter(dead_letter_after: Option<u64>, delivery_count: u64) -> bool {
    dead_letter_after.is_some_and(|limit| delivery_count >= limit)
}

/// Counters for one consumer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerSummary {
    pub admitted: u64,
    pub acked: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    pub resolution_failures: u64,
}

#[derive(Default)]
struct ConsumerStats {
    admitted: AtomicU64,
    acked: AtomicU64,
    requeued: AtomicU64,
    dead_lettered: AtomicU64,
    resolution_failures: AtomicU64,
}

impl ConsumerStats {
    fn snapshot(&self) -> ConsumerSummary {
        ConsumerSummary {
            admitted: self.admitted.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            resolution_failures: self.resolution_failures.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the in-flight gauge however the task ends
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        MESSAGES_IN_FLIGHT.inc();
        InFlight
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        MESSAGES_IN_FLIGHT.dec();
    }
}

/// Consumes one queue with at most `prefetch` messages in processing at once.
///
/// Each admitted delivery runs on its own task holding one admission permit
/// until the delivery has been resolved.
pub struct BoundedConsumer {
    processor: Arc<MessageProcessor>,
    options: ConsumerOptions,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    stats: Arc<ConsumerStats>,
}

impl BoundedConsumer {
    pub fn new(processor: Arc<MessageProcessor>, options: ConsumerOptions, tracker: TaskTracker) -> Self {
        let permits = Arc::new(Semaphore::new(options.prefetch()));
        Self {
            processor,
            options,
            permits,
            tracker,
            dead_letter: None,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    /// Destination for payloads that exceed `dead_letter_after`
    pub fn with_dead_letter(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letter = Some(sink);
        self
    }

    /// Deliveries admitted and not yet resolved
    pub fn in_flight(&self) -> usize {
        self.options.prefetch() - self.permits.available_permits()
    }

    pub fn summary(&self) -> ConsumerSummary {
        self.stats.snapshot()
    }

    /// Admit deliveries until `admission` is cancelled.
    ///
    /// Returns once admission has stopped; tasks already admitted keep running
    /// on the tracker. Fails only if the subscription cannot be
    /// (re)established within the resubscribe policy.
    pub async fn run(
        &self,
        subscriber: &dyn QueueSubscriber,
        admission: &CancellationToken,
    ) -> Result<ConsumerSummary> {
        let Some(mut stream) = self.subscribe(subscriber, admission).await? else {
            return Ok(self.summary());
        };

        info!(
            queue = %self.options.queue.name,
            prefetch = self.options.prefetch(),
            "Consumer started"
        );

        loop {
            let permit = tokio::select! {
                biased;
                _ = admission.cancelled() => break,
                permit = self.permits.clone().acquire_owned() => permit
                    .map_err(|_| AppError::Internal("admission semaphore closed".to_string()))?,
            };

            let next = tokio::select! {
                biased;
                _ = admission.cancelled() => break,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(message)) => self.dispatch(message, permit),
                Some(Err(e)) => {
                    warn!(queue = %self.options.queue.name, error = %e, "Delivery stream error");
                }
                None => {
                    warn!(queue = %self.options.queue.name, "Delivery stream ended; resubscribing");
                    drop(permit);
                    match self.subscribe(subscriber, admission).await? {
                        Some(next_stream) => stream = next_stream,
                        None => break,
                    }
                }
            }
        }

        info!(
            queue = %self.options.queue.name,
            in_flight = self.in_flight(),
            "Admission stopped"
        );
        Ok(self.summary())
    }

    /// `None` when shutdown interrupted the attempt
    async fn subscribe(
        &self,
        subscriber: &dyn QueueSubscriber,
        admission: &CancellationToken,
    ) -> Result<Option<DeliveryStream>> {
        let queue = &self.options.queue;
        let result = connect_with_retry(
            subscriber.connection_state(),
            &self.options.resubscribe,
            admission,
            |_| subscriber.subscribe(queue),
        )
        .await;

        match result {
            Ok(stream) => Ok(Some(stream)),
            Err(ConnectionError::Cancelled { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn dispatch(&self, message: InboundMessage, permit: OwnedSemaphorePermit) {
        MESSAGES_RECEIVED_TOTAL.inc();
        self.stats.admitted.fetch_add(1, Ordering::Relaxed);

        let span = info_span!(
            "delivery",
            subject = %message.metadata().subject,
            delivery_count = message.metadata().delivery_count
        );
        let processor = self.processor.clone();
        let dead_letter = self.dead_letter.clone();
        let dead_letter_after = self.options.dead_letter_after;
        let stats = self.stats.clone();

        self.tracker.spawn(
            async move {
                let _permit = permit;
                let _in_flight = InFlight::enter();
                let timer = PROCESSING_DURATION_SECONDS.start_timer();
                let (payload, metadata, guard) = message.into_parts();

                let outcome = AssertUnwindSafe(processor.process(&payload))
                    .catch_unwind()
                    .await;
                let (disposition, reason) = settle(
                    outcome,
                    payload,
                    &metadata,
                    dead_letter.as_deref(),
                    dead_letter_after,
                )
                .await;

                match guard.resolve(disposition).await {
                    Ok(()) => record(&stats, disposition, reason),
                    Err(e) => {
                        RESOLUTION_FAILURES_TOTAL.inc();
                        stats.resolution_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            disposition = %disposition,
                            error = %e,
                            "Could not resolve delivery; broker will redeliver"
                        );
                    }
                }
                timer.observe_duration();
            }
            .instrument(span),
        );
    }
}

/// Pick the single resolution for a delivery
async fn settle(
    outcome: std::result::Result<std::result::Result<Event, ProcessingError>, Box<dyn Any + Send>>,
    payload: Bytes,
    metadata: &DeliveryMetadata,
    dead_letter: Option<&dyn DeadLetterSink>,
    dead_letter_after: Option<u64>,
) -> (Disposition, &'static str) {
    let err = match outcome {
        Ok(Ok(event)) => {
            debug!(
                event_type = %event.event_type,
                source = %event.source,
                "Event stored"
            );
            return (Disposition::Ack, "stored");
        }
        Ok(Err(err)) => err,
        Err(panic) => {
            error!(
                panic = %panic_message(panic.as_ref()),
                "Processing panicked; requeueing"
            );
            return (Disposition::Requeue, "defect");
        }
    };

    if err.is_permanent() && should_dead_letter(dead_letter_after, metadata.delivery_count) {
        if let Some(sink) = dead_letter {
            match sink.dead_letter(payload, metadata, &err.to_string()).await {
                Ok(()) => {
                    warn!(error = %err, "Dead-lettered malformed payload");
                    return (Disposition::Reject, "dead_letter");
                }
                Err(e) => {
                    error!(error = %e, "Dead-letter publish failed; requeueing instead");
                }
            }
        }
    }

    match &err {
        ProcessingError::Persist {
            event_type,
            event_source,
            ..
        } => warn!(
            event_type = %event_type,
            source = %event_source,
            error = %err,
            "Failed to persist event; requeueing"
        ),
        ProcessingError::Decode(_) => warn!(error = %err, "Malformed payload; requeueing"),
    }
    (Disposition::Requeue, err.reason())
}

fn record(stats: &ConsumerStats, disposition: Disposition, reason: &str) {
    match disposition {
        Disposition::Ack => {
            MESSAGES_ACKED_TOTAL.inc();
            stats.acked.fetch_add(1, Ordering::Relaxed);
        }
        Disposition::Requeue => {
            MESSAGES_REQUEUED_TOTAL.with_label_values(&[reason]).inc();
            stats.requeued.fetch_add(1, Ordering::Relaxed);
        }
        Disposition::Reject => {
            MESSAGES_DEAD_LETTERED_TOTAL.inc();
            stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_dead_letter() {
        assert!(!should_dead_letter(None, 1_000));
        assert!(!should_dead_letter(Some(3), 2));
        assert!(should_dead_letter(Some(3), 3));
        assert!(should_dead_letter(Some(3), 4));
    }

    #[test]
    fn test_prefetch_floor() {
        let options = ConsumerOptions::new(QueueSpec::new("events", 0));
        assert_eq!(options.prefetch(), 1);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[tokio::test]
    async fn test_panic_requeues() {
        let metadata = DeliveryMetadata {
            subject: "events".to_string(),
            delivery_count: 1,
        };
        let outcome = Err(Box::new("boom") as Box<dyn Any + Send>);

        let (disposition, reason) =
            settle(outcome, Bytes::new(), &metadata, None, Some(1)).await;
        assert_eq!(disposition, Disposition::Requeue);
        assert_eq!(reason, "defect");
    }

    #[tokio::test]
    async fn test_decode_error_without_sink_requeues() {
        let metadata = DeliveryMetadata {
            subject: "events".to_string(),
            delivery_count: 5,
        };
        let outcome = Ok(Err(ProcessingError::Decode("bad".to_string())));

        let (disposition, reason) =
            settle(outcome, Bytes::new(), &metadata, None, Some(1)).await;
        assert_eq!(disposition, Disposition::Requeue);
        assert_eq!(reason, "decode");
    }
}

//! NATS JetStream work-queue implementation
//!
//! A queue maps onto a JetStream stream with work-queue retention capturing
//! the queue's subject, consumed through a durable pull consumer with
//! explicit acks. `max_ack_pending` is the broker side of the prefetch limit.

use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, PullConsumer},
    stream::{self, RetentionPolicy, StorageType},
    AckKind,
};
use async_nats::{Client, ConnectOptions, Event, HeaderMap};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::messaging::config::{NatsConfig, QueueSpec};
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::message::{DeliveryMetadata, Disposition, InboundMessage};
use crate::messaging::traits::{Acknowledger, DeadLetterSink, DeliveryStream, QueueSubscriber};
use crate::supervisor::{ConnectionState, ConnectionStateHandle};

/// Header carrying the reason a payload was dead-lettered
pub const DEAD_LETTER_REASON_HEADER: &str = "Event-Worker-Dead-Letter-Reason";
/// Header carrying the delivery count at the time of dead-lettering
pub const DEAD_LETTER_DELIVERIES_HEADER: &str = "Event-Worker-Delivery-Count";

/// JetStream broker connection
pub struct NatsBroker {
    client: Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
    state: ConnectionStateHandle,
    requeue_delay: Option<Duration>,
}

impl NatsBroker {
    /// Open one connection attempt. Reconnects after an established
    /// connection drops are handled by the client without limit, pausing
    /// `reconnect_delay` between tries.
    pub async fn connect(
        config: &NatsConfig,
        reconnect_delay: Duration,
        state: ConnectionStateHandle,
    ) -> MessagingResult<Self> {
        let event_state = state.clone();
        let client = ConnectOptions::new()
            .name(&config.connection_name)
            .connection_timeout(config.connection_timeout())
            .ping_interval(config.ping_interval())
            .reconnect_delay_callback(move |attempts| dial_delay(attempts, reconnect_delay))
            .event_callback(move |event| {
                let state = event_state.clone();
                async move { on_client_event(&state, event) }
            })
            .connect(config.server_list().as_str())
            .await
            .map_err(|e| MessagingError::ConnectionFailed(format!("NATS connection failed: {}", e)))?;

        let jetstream = jetstream::new(client.clone());
        state.set(ConnectionState::Connected);
        info!(servers = %config.server_list(), "Connected to NATS");

        Ok(Self {
            client,
            jetstream,
            config: config.clone(),
            state,
            requeue_delay: None,
        })
    }

    /// Delay the broker waits before redelivering a requeued message
    pub fn with_requeue_delay(mut self, delay: Option<Duration>) -> Self {
        self.requeue_delay = delay;
        self
    }

    /// Declare the stream that holds dead-lettered payloads
    pub async fn declare_dead_letter_queue(&self, queue: &QueueSpec) -> MessagingResult<()> {
        let name = queue.dead_letter_queue_name();
        self.jetstream
            .get_or_create_stream(stream::Config {
                name: name.clone(),
                subjects: vec![self.config.dead_letter_subject.clone()],
                storage: storage_for(queue),
                ..Default::default()
            })
            .await
            .map_err(|e| MessagingError::SubscribeFailed(format!("declare {}: {}", name, e)))?;

        info!(
            stream = %name,
            subject = %self.config.dead_letter_subject,
            "Dead-letter queue declared"
        );
        Ok(())
    }

    async fn declare_queue(&self, queue: &QueueSpec) -> MessagingResult<stream::Stream> {
        let stream = self
            .jetstream
            .get_or_create_stream(stream::Config {
                name: queue.name.clone(),
                subjects: vec![queue.subject.clone()],
                retention: RetentionPolicy::WorkQueue,
                storage: storage_for(queue),
                ..Default::default()
            })
            .await
            .map_err(|e| MessagingError::SubscribeFailed(format!("declare {}: {}", queue.name, e)))?;

        verify_stream(queue, &stream.cached_info().config)?;
        Ok(stream)
    }

    async fn declare_consumer(
        &self,
        stream: &stream::Stream,
        queue: &QueueSpec,
    ) -> MessagingResult<PullConsumer> {
        let name = queue.consumer_name();
        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                &name,
                pull::Config {
                    durable_name: Some(name.clone()),
                    filter_subject: queue.subject.clone(),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait(),
                    max_ack_pending: prefetch_limit(queue),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| MessagingError::SubscribeFailed(format!("consumer {}: {}", name, e)))?;

        let existing = &consumer.cached_info().config;
        if existing.ack_policy != AckPolicy::Explicit {
            return Err(MessagingError::QueueMismatch {
                queue: queue.name.clone(),
                reason: format!("consumer {} does not use explicit acks", name),
            });
        }
        if existing.max_ack_pending != prefetch_limit(queue) {
            warn!(
                consumer = %name,
                existing = existing.max_ack_pending,
                requested = queue.prefetch,
                "Consumer prefetch differs from configuration; local limit still applies"
            );
        }

        Ok(consumer)
    }
}

/// The client asks for a delay before every dial, the first one included.
/// Only redials wait; startup spacing belongs to the supervisor.
fn dial_delay(attempts: usize, reconnect_delay: Duration) -> Duration {
    if attempts <= 1 {
        Duration::ZERO
    } else {
        reconnect_delay
    }
}

/// Bound a flush so a wedged connection cannot stall shutdown
async fn flush_within<F, E>(timeout: Duration, flush: F) -> MessagingResult<()>
where
    F: std::future::Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(timeout, flush).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(MessagingError::ConnectionFailed(format!("NATS flush failed: {}", e))),
        Err(_) => Err(MessagingError::ConnectionFailed(format!(
            "NATS flush timed out after {:?}",
            timeout
        ))),
    }
}

fn storage_for(queue: &QueueSpec) -> StorageType {
    if queue.durable {
        StorageType::File
    } else {
        StorageType::Memory
    }
}

fn prefetch_limit(queue: &QueueSpec) -> i64 {
    i64::try_from(queue.prefetch).unwrap_or(i64::MAX)
}

/// Reject an existing stream whose properties would break work-queue semantics
pub(crate) fn verify_stream(queue: &QueueSpec, existing: &stream::Config) -> MessagingResult<()> {
    let mismatch = |reason: String| MessagingError::QueueMismatch {
        queue: queue.name.clone(),
        reason,
    };

    if existing.retention != RetentionPolicy::WorkQueue {
        return Err(mismatch(format!(
            "retention is {:?}, expected WorkQueue",
            existing.retention
        )));
    }
    if !existing.subjects.iter().any(|s| s == &queue.subject) {
        return Err(mismatch(format!(
            "subject '{}' is not captured (subjects: {:?})",
            queue.subject, existing.subjects
        )));
    }
    if queue.durable && existing.storage != StorageType::File {
        return Err(mismatch("durable queue is not file-backed".to_string()));
    }
    Ok(())
}

fn on_client_event(state: &ConnectionStateHandle, event: Event) {
    let winding_down = matches!(
        state.get(),
        ConnectionState::Draining | ConnectionState::Closed
    );
    match event {
        Event::Connected => {
            info!("NATS connection re-established");
            if !winding_down {
                state.set(ConnectionState::Connected);
            }
        }
        Event::Disconnected => {
            warn!("NATS connection lost; client is reconnecting");
            if !winding_down {
                state.set(ConnectionState::Disconnected);
            }
        }
        other => debug!(event = %other, "NATS client event"),
    }
}

#[async_trait]
impl QueueSubscriber for NatsBroker {
    async fn subscribe(&self, queue: &QueueSpec) -> MessagingResult<DeliveryStream> {
        let stream = self.declare_queue(queue).await?;
        let consumer = self.declare_consumer(&stream, queue).await?;

        let messages = consumer
            .stream()
            .max_messages_per_batch(queue.prefetch)
            .messages()
            .await
            .map_err(|e| MessagingError::SubscribeFailed(format!("NATS pull failed: {}", e)))?;

        info!(
            queue = %queue.name,
            consumer = %queue.consumer_name(),
            prefetch = queue.prefetch,
            "Subscribed to queue"
        );

        let requeue_delay = self.requeue_delay;
        Ok(messages
            .map(move |result| match result {
                Ok(message) => Ok(inbound(message, requeue_delay)),
                Err(e) => Err(MessagingError::ConsumeFailed(e.to_string())),
            })
            .boxed())
    }

    fn connection_state(&self) -> &ConnectionStateHandle {
        &self.state
    }

    /// Flush pending acks and publishes, bounded by the connect timeout.
    ///
    /// The client keeps its socket until it is dropped with the process, so
    /// deliveries abandoned by a drain timeout can still resolve; anything
    /// they leave unacked is redelivered after `ack_wait`.
    async fn close(&self) -> MessagingResult<()> {
        flush_within(self.config.connection_timeout(), self.client.flush()).await?;
        info!("NATS connection flushed");
        Ok(())
    }
}

#[async_trait]
impl DeadLetterSink for NatsBroker {
    async fn dead_letter(
        &self,
        payload: Bytes,
        metadata: &DeliveryMetadata,
        reason: &str,
    ) -> MessagingResult<()> {
        let mut headers = HeaderMap::new();
        headers.insert(DEAD_LETTER_REASON_HEADER, reason);
        headers.insert(
            DEAD_LETTER_DELIVERIES_HEADER,
            metadata.delivery_count.to_string().as_str(),
        );

        self.jetstream
            .publish_with_headers(self.config.dead_letter_subject.clone(), headers, payload)
            .await
            .map_err(|e| MessagingError::PublishFailed(format!("NATS publish failed: {}", e)))?
            .await
            .map_err(|e| MessagingError::PublishFailed(format!("NATS publish not acked: {}", e)))?;

        Ok(())
    }
}

fn inbound(message: jetstream::Message, requeue_delay: Option<Duration>) -> InboundMessage {
    let delivery_count = message
        .info()
        .map(|info| u64::try_from(info.delivered).unwrap_or(1).max(1))
        .unwrap_or(1);
    let metadata = DeliveryMetadata {
        subject: message.message.subject.to_string(),
        delivery_count,
    };
    let payload = message.message.payload.clone();

    InboundMessage::new(
        payload,
        metadata,
        Box::new(JetStreamAcker {
            message,
            requeue_delay,
        }),
    )
}

/// Delivery handle backed by a JetStream message
struct JetStreamAcker {
    message: jetstream::Message,
    requeue_delay: Option<Duration>,
}

#[async_trait]
impl Acknowledger for JetStreamAcker {
    async fn resolve(self: Box<Self>, disposition: Disposition) -> MessagingResult<()> {
        let kind = match disposition {
            Disposition::Ack => AckKind::Ack,
            Disposition::Requeue => AckKind::Nak(self.requeue_delay),
            Disposition::Reject => AckKind::Term,
        };

        self.message
            .ack_with(kind)
            .await
            .map_err(|e| MessagingError::AckFailed(format!("{}: {}", disposition, e)))
    }
}

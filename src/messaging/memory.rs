//! In-memory work queue
//!
//! Mirrors broker semantics closely enough to run the worker without NATS:
//! deliveries stay outstanding until resolved, a requeue redelivers with an
//! incremented delivery count, and closing the connection returns every
//! outstanding delivery to the queue.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::messaging::config::QueueSpec;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::message::{DeliveryMetadata, Disposition, InboundMessage};
use crate::messaging::traits::{Acknowledger, DeadLetterSink, DeliveryStream, QueueSubscriber};
use crate::supervisor::{ConnectionState, ConnectionStateHandle};

/// A resolution observed by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub tag: u64,
    pub disposition: Disposition,
    pub delivery_count: u64,
}

/// A payload moved to the dead-letter queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub payload: Bytes,
    pub delivery_count: u64,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct Queued {
    payload: Bytes,
    delivery_count: u64,
}

#[derive(Default)]
struct BrokerState {
    ready: VecDeque<Queued>,
    outstanding: HashMap<u64, Queued>,
    next_tag: u64,
    resolutions: Vec<Resolution>,
    dead_letters: Vec<DeadLetter>,
    closed: bool,
}

struct Shared {
    queue: QueueSpec,
    state: Mutex<BrokerState>,
    notify: Notify,
}

/// In-memory broker for a single queue
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
    connection: ConnectionStateHandle,
}

impl InMemoryBroker {
    pub fn new(queue: QueueSpec) -> Self {
        let connection = ConnectionStateHandle::new("broker");
        connection.set(ConnectionState::Connected);
        Self::with_state(queue, connection)
    }

    pub fn with_state(queue: QueueSpec, connection: ConnectionStateHandle) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
            }),
            connection,
        }
    }

    /// Enqueue a message as a producer would
    pub fn publish(&self, payload: impl Into<Bytes>) {
        self.shared.state.lock().ready.push_back(Queued {
            payload: payload.into(),
            delivery_count: 0,
        });
        self.shared.notify.notify_waiters();
    }

    /// Messages waiting to be delivered
    pub fn ready(&self) -> usize {
        self.shared.state.lock().ready.len()
    }

    /// Deliveries handed out and not yet resolved
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding.len()
    }

    pub fn resolutions(&self) -> Vec<Resolution> {
        self.shared.state.lock().resolutions.clone()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.state.lock().dead_letters.clone()
    }

    /// Return every outstanding delivery to the queue, as a broker does when
    /// the consuming connection goes away
    pub fn recover(&self) -> usize {
        let mut state = self.shared.state.lock();
        let mut tags: Vec<u64> = state.outstanding.keys().copied().collect();
        tags.sort_unstable();
        let recovered = tags.len();
        for tag in tags {
            if let Some(queued) = state.outstanding.remove(&tag) {
                state.ready.push_back(queued);
            }
        }
        drop(state);
        self.shared.notify.notify_waiters();
        recovered
    }

    /// Accept subscriptions again after [`close`](QueueSubscriber::close), as
    /// another worker's connection would. The closed connection state stays
    /// closed.
    pub fn reopen(&self) {
        self.shared.state.lock().closed = false;
    }

    async fn wait_for_delivery(shared: &Arc<Shared>) -> Option<InboundMessage> {
        loop {
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if shared.state.lock().closed {
                return None;
            }
            if let Some(message) = Self::next_delivery(shared) {
                return Some(message);
            }
            notified.await;
        }
    }

    fn next_delivery(shared: &Arc<Shared>) -> Option<InboundMessage> {
        let mut state = shared.state.lock();
        if state.closed {
            return None;
        }
        let mut queued = state.ready.pop_front()?;
        queued.delivery_count += 1;
        state.next_tag += 1;
        let tag = state.next_tag;
        state.outstanding.insert(tag, queued.clone());

        Some(InboundMessage::new(
            queued.payload,
            DeliveryMetadata {
                subject: shared.queue.subject.clone(),
                delivery_count: queued.delivery_count,
            },
            Box::new(MemoryAcker {
                shared: shared.clone(),
                tag,
            }),
        ))
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("queue", &self.shared.queue.name)
            .field("ready", &self.ready())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

#[async_trait]
impl QueueSubscriber for InMemoryBroker {
    async fn subscribe(&self, queue: &QueueSpec) -> MessagingResult<DeliveryStream> {
        if queue.name != self.shared.queue.name || queue.durable != self.shared.queue.durable {
            return Err(MessagingError::QueueMismatch {
                queue: queue.name.clone(),
                reason: format!("broker only serves queue '{}'", self.shared.queue.name),
            });
        }
        if self.shared.state.lock().closed {
            return Err(MessagingError::ConnectionClosed);
        }

        let stream = futures::stream::unfold(self.shared.clone(), |shared| async move {
            let message = InMemoryBroker::wait_for_delivery(&shared).await?;
            Some((Ok(message), shared))
        });

        Ok(stream.boxed())
    }

    fn connection_state(&self) -> &ConnectionStateHandle {
        &self.connection
    }

    async fn close(&self) -> MessagingResult<()> {
        self.shared.state.lock().closed = true;
        self.shared.notify.notify_waiters();
        self.recover();
        Ok(())
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryBroker {
    async fn dead_letter(
        &self,
        payload: Bytes,
        metadata: &DeliveryMetadata,
        reason: &str,
    ) -> MessagingResult<()> {
        self.shared.state.lock().dead_letters.push(DeadLetter {
            payload,
            delivery_count: metadata.delivery_count,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    tag: u64,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn resolve(self: Box<Self>, disposition: Disposition) -> MessagingResult<()> {
        let mut state = self.shared.state.lock();
        // Already recovered by a close: the broker has forgotten this tag.
        let queued = state
            .outstanding
            .remove(&self.tag)
            .ok_or(MessagingError::ConnectionClosed)?;

        state.resolutions.push(Resolution {
            tag: self.tag,
            disposition,
            delivery_count: queued.delivery_count,
        });
        if disposition == Disposition::Requeue {
            state.ready.push_back(queued);
            drop(state);
            self.shared.notify.notify_waiters();
        }
        Ok(())
    }
}

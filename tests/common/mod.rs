//! Common test utilities
//!
//! Store doubles with injectable latency, failures and panics, plus a harness
//! that runs a [`Worker`] against an [`InMemoryBroker`].

#![allow(dead_code)]

use async_trait::async_trait;
use devops_event_worker::{
    consumer::{BoundedConsumer, ConsumerOptions},
    messaging::{InMemoryBroker, QueueSpec},
    models::{Event, NewEvent},
    processing::MessageProcessor,
    shutdown::ShutdownCoordinator,
    storage::{EventStore, InMemoryEventStore, StoreError, StoreResult},
    supervisor::{ConnectionStateHandle, RetryPolicy},
    worker::{Worker, WorkerReport},
    Result,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Outcome scripted for one insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Succeed,
    Fail,
    Panic,
}

/// Event store double wrapping [`InMemoryEventStore`]
pub struct TestStore {
    inner: InMemoryEventStore,
    delay: Duration,
    script: Mutex<VecDeque<Step>>,
    gate: Option<Semaphore>,
    active: AtomicUsize,
    peak: AtomicUsize,
    attempts: AtomicUsize,
    closes: AtomicUsize,
}

impl TestStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryEventStore::new(),
            delay: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            gate: None,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Every insert takes `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Outcomes for the first inserts; later inserts succeed
    pub fn with_script(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script.lock().extend(steps);
        self
    }

    /// Inserts wait until [`release`](Self::release) hands out a pass
    pub fn blocking(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn release(&self, inserts: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(inserts);
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.events()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Inserts currently in progress
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent inserts observed
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventStore for TestStore {
    async fn insert(&self, event: &NewEvent) -> StoreResult<Event> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().pop_front().unwrap_or(Step::Succeed);
        if step == Step::Panic {
            panic!("injected store panic");
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = match step {
            Step::Fail => Err(StoreError::Unavailable("injected failure".to_string())),
            _ => self.inner.insert(event).await,
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn connection_state(&self) -> &ConnectionStateHandle {
        self.inner.connection_state()
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await;
    }
}

/// Consumer options with a fast resubscribe policy
pub fn options(prefetch: usize) -> ConsumerOptions {
    ConsumerOptions {
        queue: QueueSpec::new("events", prefetch),
        dead_letter_after: None,
        resubscribe: RetryPolicy::new(3, Duration::from_millis(10)),
    }
}

/// A running worker and handles to its collaborators
pub struct Harness {
    pub broker: InMemoryBroker,
    pub store: Arc<TestStore>,
    pub coordinator: Arc<ShutdownCoordinator>,
    handle: JoinHandle<Result<WorkerReport>>,
}

impl Harness {
    pub fn start(
        broker: &InMemoryBroker,
        store: Arc<TestStore>,
        options: ConsumerOptions,
        drain_timeout: Duration,
    ) -> Self {
        let coordinator = Arc::new(ShutdownCoordinator::new(drain_timeout));
        let dead_letter = options.dead_letter_after.is_some();
        let processor = Arc::new(MessageProcessor::new(store.clone()));

        let mut consumer = BoundedConsumer::new(processor, options, coordinator.tracker());
        if dead_letter {
            consumer = consumer.with_dead_letter(Arc::new(broker.clone()));
        }

        let worker = Worker::from_parts(
            consumer,
            Arc::new(broker.clone()),
            store.clone(),
            coordinator.clone(),
        );
        let handle = tokio::spawn(worker.run());

        Self {
            broker: broker.clone(),
            store,
            coordinator,
            handle,
        }
    }

    /// Request shutdown and wait for the worker to finish
    pub async fn stop(self) -> WorkerReport {
        self.coordinator.begin_drain();
        self.join().await
    }

    pub async fn join(self) -> WorkerReport {
        self.handle
            .await
            .expect("worker task panicked")
            .expect("worker failed")
    }
}

/// Poll `condition` every few milliseconds; panic after five seconds
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn event_payload(event_type: &str, source: &str) -> Vec<u8> {
    serde_json::json!({
        "type": event_type,
        "source": source,
        "message": format!("{} from {}", event_type, source),
        "severity": "info",
    })
    .to_string()
    .into_bytes()
}

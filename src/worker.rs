//! Process wiring: connect, consume, drain, close.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::api::{self, AppState};
use crate::config::Config;
use crate::consumer::{BoundedConsumer, ConsumerSummary};
use crate::error::{AppError, Result};
use crate::messaging::{NatsBroker, QueueSubscriber};
use crate::metrics;
use crate::processing::MessageProcessor;
use crate::shutdown::{DrainReport, ShutdownCoordinator};
use crate::storage::{connect_store, EventStore};
use crate::supervisor::{connect_with_retry, ConnectionError, ConnectionState, ConnectionStateHandle};

/// What a worker did between startup and exit
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub consumed: ConsumerSummary,
    pub drain: DrainReport,
}

/// A connected worker, ready to consume
pub struct Worker {
    consumer: BoundedConsumer,
    subscriber: Arc<dyn QueueSubscriber>,
    store: Arc<dyn EventStore>,
    coordinator: Arc<ShutdownCoordinator>,
}

impl Worker {
    /// Connect the store, then the broker, each under the startup retry
    /// policy. Fails without consuming anything if either is unreachable.
    pub async fn bootstrap(
        config: &Config,
        coordinator: Arc<ShutdownCoordinator>,
        broker_state: ConnectionStateHandle,
        store_state: ConnectionStateHandle,
    ) -> Result<Self> {
        let policy = config.startup.retry_policy();
        let cancel = coordinator.admission_token();

        let store = connect_with_retry(&store_state, &policy, &cancel, |_| {
            connect_store(&config.store, store_state.clone())
        })
        .await?;

        let broker = connect_with_retry(&broker_state, &policy, &cancel, |_| {
            NatsBroker::connect(&config.broker, policy.interval, broker_state.clone())
        })
        .await;
        let broker = match broker {
            Ok(broker) => Arc::new(broker.with_requeue_delay(config.consumer.requeue_delay())),
            Err(e) => {
                close_store(store.as_ref()).await;
                return Err(e.into());
            }
        };

        let processor = Arc::new(MessageProcessor::new(store.clone()));
        let mut consumer =
            BoundedConsumer::new(processor, config.consumer_options(), coordinator.tracker());

        if config.consumer.dead_letter_after.is_some() {
            if let Err(e) = broker
                .declare_dead_letter_queue(&config.consumer.queue_spec())
                .await
            {
                close_store(store.as_ref()).await;
                return Err(e.into());
            }
            consumer = consumer.with_dead_letter(broker.clone());
        }

        Ok(Self::from_parts(consumer, broker, store, coordinator))
    }

    /// Assemble a worker from already-connected parts
    pub fn from_parts(
        consumer: BoundedConsumer,
        subscriber: Arc<dyn QueueSubscriber>,
        store: Arc<dyn EventStore>,
        coordinator: Arc<ShutdownCoordinator>,
    ) -> Self {
        Self {
            consumer,
            subscriber,
            store,
            coordinator,
        }
    }

    /// Consume until shutdown is requested, then drain and close.
    ///
    /// Connections are closed even when consumption fails.
    pub async fn run(self) -> Result<WorkerReport> {
        let admission = self.coordinator.admission_token();
        let admitted = self.consumer.run(self.subscriber.as_ref(), &admission).await;

        if let Err(e) = &admitted {
            error!(error = %e, "Consumer stopped; shutting down");
            self.coordinator.begin_drain();
        }

        let drain = self
            .coordinator
            .shutdown(self.subscriber.as_ref(), self.store.as_ref())
            .await
            .ok_or_else(|| AppError::Internal("shutdown already performed".to_string()))?;
        admitted?;

        // Deliveries resolved during the drain count too
        Ok(WorkerReport {
            consumed: self.consumer.summary(),
            drain,
        })
    }
}

async fn close_store(store: &dyn EventStore) {
    store.close().await;
    store.connection_state().set(ConnectionState::Closed);
}

/// Run the worker described by `config` until a termination signal.
///
/// Returns `Ok(None)` if shutdown was requested before both connections
/// were established.
pub async fn run(config: Config) -> Result<Option<WorkerReport>> {
    if let Err(e) = metrics::init_metrics() {
        warn!("Failed to initialize metrics: {}", e);
    }

    let coordinator = Arc::new(ShutdownCoordinator::new(config.shutdown.drain_timeout()));
    let broker_state = ConnectionStateHandle::new("broker");
    let store_state = ConnectionStateHandle::new("store");

    let signals = coordinator.clone();
    tokio::spawn(async move {
        if let Err(e) = signals.listen_for_signals().await {
            error!(error = %e, "Failed to install signal handlers");
        }
    });

    if config.observability.health.enabled {
        let addr = config
            .observability
            .health
            .socket_addr()
            .map_err(|e| AppError::Configuration(format!("health address: {}", e)))?;
        let state = AppState::new(coordinator.clone(), broker_state.clone(), store_state.clone());
        let closed = coordinator.closed_token();
        tokio::spawn(async move {
            if let Err(e) = api::serve(addr, state, closed).await {
                error!(error = %e, "Health server failed");
            }
        });
    }

    let worker = match Worker::bootstrap(&config, coordinator.clone(), broker_state, store_state).await {
        Ok(worker) => worker,
        Err(AppError::Connection(ConnectionError::Cancelled { target, attempts })) => {
            info!(connection = %target, attempts, "Shutdown requested during startup");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    info!(
        queue = %config.consumer.queue,
        prefetch = config.consumer.prefetch,
        "Worker running"
    );
    worker.run().await.map(Some)
}

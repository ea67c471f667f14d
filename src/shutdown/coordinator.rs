use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use super::signals::ShutdownSignals;
use crate::messaging::QueueSubscriber;
use crate::storage::EventStore;
use crate::supervisor::ConnectionState;

/// Worker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum RunState {
    Running = 0,
    Draining = 1,
    Closed = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunState::Running,
            1 => RunState::Draining,
            _ => RunState::Closed,
        }
    }
}

/// Outcome of [`ShutdownCoordinator::shutdown`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Deliveries in flight when draining began
    pub in_flight: usize,
    /// Deliveries still unresolved when the drain timeout elapsed
    pub abandoned: usize,
    /// Every in-flight delivery finished inside the timeout
    pub drained: bool,
    pub elapsed: Duration,
}

/// Owns the `Running -> Draining -> Closed` transition.
///
/// Draining cancels the admission token observed by the consumer. In-flight
/// work is tracked on [`tracker`](Self::tracker) and waited for up to the drain
/// timeout; then the broker connection is closed, then the store pool.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    state: AtomicU8,
    admission: CancellationToken,
    closed: CancellationToken,
    tracker: TaskTracker,
    drain_timeout: Duration,
    closing: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            state: AtomicU8::new(RunState::Running as u8),
            admission: CancellationToken::new(),
            closed: CancellationToken::new(),
            tracker: TaskTracker::new(),
            drain_timeout,
            closing: AtomicBool::new(false),
        }
    }

    pub fn run_state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Cancelled when admission of new deliveries must stop
    pub fn admission_token(&self) -> CancellationToken {
        self.admission.clone()
    }

    /// Cancelled once both connections are closed
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Tracker for in-flight processing tasks
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Move `Running -> Draining` and stop admission. Returns `false` if
    /// shutdown had already begun.
    pub fn begin_drain(&self) -> bool {
        let started = self
            .state
            .compare_exchange(
                RunState::Running as u8,
                RunState::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();

        if started {
            info!("Shutdown requested; no new deliveries will be admitted");
            self.admission.cancel();
        }
        started
    }

    /// Turn termination signals into [`begin_drain`](Self::begin_drain) until
    /// shutdown completes. Later signals are logged and otherwise ignored.
    pub async fn listen_for_signals(self: Arc<Self>) -> io::Result<()> {
        let mut signals = ShutdownSignals::register()?;
        loop {
            tokio::select! {
                _ = self.closed.cancelled() => return Ok(()),
                name = signals.recv() => {
                    if !self.begin_drain() {
                        info!(signal = name, "Shutdown already in progress; signal ignored");
                    }
                }
            }
        }
    }

    /// Drain in-flight work, then close the broker and the store, each once.
    ///
    /// Returns `None` if shutdown was already performed.
    pub async fn shutdown(
        &self,
        broker: &dyn QueueSubscriber,
        store: &dyn EventStore,
    ) -> Option<DrainReport> {
        self.begin_drain();
        if self.closing.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already performed; connections stay closed");
            return None;
        }

        let started = Instant::now();
        broker.connection_state().set(ConnectionState::Draining);
        store.connection_state().set(ConnectionState::Draining);

        self.tracker.close();
        let in_flight = self.tracker.len();
        info!(
            in_flight,
            timeout_secs = self.drain_timeout.as_secs_f64(),
            "Draining in-flight messages"
        );

        let drained = tokio::time::timeout(self.drain_timeout, self.tracker.wait())
            .await
            .is_ok();
        let abandoned = if drained { 0 } else { self.tracker.len() };
        if !drained {
            warn!(
                abandoned,
                "Drain timeout elapsed; unresolved deliveries will be redelivered by the broker"
            );
        }

        if let Err(e) = broker.close().await {
            error!(error = %e, "Error while closing broker connection");
        }
        broker.connection_state().set(ConnectionState::Closed);

        store.close().await;
        store.connection_state().set(ConnectionState::Closed);

        self.state.store(RunState::Closed as u8, Ordering::SeqCst);
        self.closed.cancel();

        let report = DrainReport {
            in_flight,
            abandoned,
            drained,
            elapsed: started.elapsed(),
        };
        info!(
            in_flight = report.in_flight,
            abandoned = report.abandoned,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Shutdown complete"
        );
        Some(report)
    }
}

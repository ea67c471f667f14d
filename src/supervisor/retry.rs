use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::error::ConnectionError;
use super::state::{ConnectionState, ConnectionStateHandle};
use crate::metrics::CONNECTION_ATTEMPTS_TOTAL;

/// Fixed-interval retry policy for establishing connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    pub fn budget(&self) -> RetryBudget {
        RetryBudget {
            max_attempts: self.max_attempts,
            used: 0,
        }
    }
}

/// Attempt counter for one connect sequence
#[derive(Debug, Clone)]
pub struct RetryBudget {
    max_attempts: u32,
    used: u32,
}

impl RetryBudget {
    /// Claim the next attempt; `None` once the budget is spent.
    pub fn next_attempt(&mut self) -> Option<u32> {
        if self.used >= self.max_attempts {
            return None;
        }
        self.used += 1;
        Some(self.used)
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts - self.used
    }
}

/// Run `connect` until it succeeds, the budget is exhausted, or `cancel` fires.
///
/// Sleeps `policy.interval` between failed attempts (not after the last one).
/// The state handle moves to `Connecting` for the duration and to `Connected`
/// on success; on failure it is left `Disconnected`.
pub async fn connect_with_retry<T, E, F, Fut>(
    state: &ConnectionStateHandle,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut connect: F,
) -> Result<T, ConnectionError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let target = state.target().to_string();
    let mut budget = policy.budget();
    let mut last_error = String::from("no attempts made");

    state.set(ConnectionState::Connecting);

    while let Some(attempt) = budget.next_attempt() {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = connect(attempt) => Some(result),
        };

        match outcome {
            None => {
                state.set(ConnectionState::Disconnected);
                warn!(connection = %target, attempt, "Connection attempt cancelled by shutdown");
                return Err(ConnectionError::Cancelled {
                    target,
                    attempts: attempt,
                });
            }
            Some(Ok(connection)) => {
                CONNECTION_ATTEMPTS_TOTAL
                    .with_label_values(&[&target, "success"])
                    .inc();
                state.set(ConnectionState::Connected);
                info!(connection = %target, attempt, "Connected to {}", target);
                return Ok(connection);
            }
            Some(Err(e)) => {
                CONNECTION_ATTEMPTS_TOTAL
                    .with_label_values(&[&target, "failure"])
                    .inc();
                last_error = e.to_string();
                warn!(
                    connection = %target,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %last_error,
                    "Waiting for {}... ({}/{})",
                    target,
                    attempt,
                    policy.max_attempts
                );
            }
        }

        if budget.remaining() == 0 {
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                state.set(ConnectionState::Disconnected);
                return Err(ConnectionError::Cancelled {
                    target,
                    attempts: budget.used(),
                });
            }
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }

    state.set(ConnectionState::Disconnected);
    error!(
        connection = %target,
        attempts = budget.used(),
        error = %last_error,
        "FATAL: could not connect to {}",
        target
    );

    Err(ConnectionError::Exhausted {
        target,
        attempts: budget.used(),
        last_error,
    })
}

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::metrics::CONNECTION_STATE;

/// Lifecycle of a single process-wide connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Draining,
    Closed,
}

impl ConnectionState {
    /// Numeric value for the Prometheus gauge
    pub fn to_metric_value(&self) -> f64 {
        match self {
            ConnectionState::Disconnected => 0.0,
            ConnectionState::Connecting => 1.0,
            ConnectionState::Connected => 2.0,
            ConnectionState::Draining => 3.0,
            ConnectionState::Closed => 4.0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

/// Shared, observable state of one connection.
///
/// Written by the supervisor, the broker client's event callback and the
/// shutdown coordinator; read by the health endpoint.
#[derive(Debug, Clone)]
pub struct ConnectionStateHandle {
    target: Arc<str>,
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionStateHandle {
    pub fn new(target: impl Into<Arc<str>>) -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        let handle = Self {
            target: target.into(),
            tx: Arc::new(tx),
        };
        handle.record_metric(ConnectionState::Disconnected);
        handle
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Move to `next`. Once `Closed`, the state never changes again.
    pub fn set(&self, next: ConnectionState) {
        let mut previous = None;
        self.tx.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            previous = Some(*current);
            *current = next;
            true
        });

        if let Some(from) = previous {
            tracing::debug!(connection = %self.target, %from, to = %next, "Connection state changed");
            self.record_metric(next);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    fn record_metric(&self, state: ConnectionState) {
        CONNECTION_STATE
            .with_label_values(&[&self.target])
            .set(state.to_metric_value());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_is_terminal() {
        let handle = ConnectionStateHandle::new("nats");
        assert_eq!(handle.get(), ConnectionState::Disconnected);

        handle.set(ConnectionState::Connecting);
        handle.set(ConnectionState::Connected);
        handle.set(ConnectionState::Closed);
        handle.set(ConnectionState::Connected);

        assert_eq!(handle.get(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_subscribers_observe_transitions() {
        let handle = ConnectionStateHandle::new("postgresql");
        let mut rx = handle.subscribe();

        handle.set(ConnectionState::Connected);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Connected);
    }

    #[test]
    fn test_display_is_snake_case() {
        assert_eq!(ConnectionState::Draining.to_string(), "draining");
        assert_eq!(ConnectionState::Connected.as_ref(), "connected");
    }
}

//! Messaging configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// NATS configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URLs
    #[validate(length(min = 1))]
    pub servers: Vec<String>,

    /// Connection name
    pub connection_name: String,

    /// Connect timeout in milliseconds
    pub connection_timeout_ms: u64,

    /// Ping interval in seconds
    pub ping_interval_secs: u64,

    /// How long the broker waits for an ack before redelivering, in seconds
    pub ack_wait_secs: u64,

    /// Subject that receives dead-lettered payloads
    pub dead_letter_subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_string()],
            connection_name: "devops-event-worker".to_string(),
            connection_timeout_ms: 5000,
            ping_interval_secs: 60,
            ack_wait_secs: 30,
            dead_letter_subject: "events.dead-letter".to_string(),
        }
    }
}

impl NatsConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }

    /// Server list in the comma-separated form the client accepts
    pub fn server_list(&self) -> String {
        self.servers.join(",")
    }
}

/// A durable work queue and the prefetch limit to consume it with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSpec {
    /// Queue name
    pub name: String,

    /// Subject published to by producers
    pub subject: String,

    /// Survive broker restarts
    pub durable: bool,

    /// Maximum unacknowledged deliveries handed to this consumer
    pub prefetch: usize,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>, prefetch: usize) -> Self {
        let name = name.into();
        Self {
            subject: name.clone(),
            name,
            durable: true,
            prefetch,
        }
    }

    /// Durable consumer name shared by every replica of this worker
    pub fn consumer_name(&self) -> String {
        format!("{}-worker", self.name)
    }

    pub fn dead_letter_queue_name(&self) -> String {
        format!("{}-dead-letter", self.name)
    }
}

impl Default for QueueSpec {
    fn default() -> Self {
        Self::new("events", 10)
    }
}

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use validator::Validate;

use crate::consumer::ConsumerOptions;
use crate::messaging::{NatsConfig, QueueSpec};
use crate::storage::StoreConfig;
use crate::supervisor::RetryPolicy;

/// Default location of the optional override file
pub const DEFAULT_CONFIG_PATH: &str = "config/worker.toml";

/// Prefix for environment overrides, e.g. `EVENT_WORKER__CONSUMER__PREFETCH=20`
pub const ENV_PREFIX: &str = "EVENT_WORKER";

/// Main worker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Broker connection
    #[serde(default)]
    #[validate(nested)]
    pub broker: NatsConfig,

    /// Event store
    #[serde(default)]
    #[validate(nested)]
    pub store: StoreConfig,

    /// Queue consumption
    #[serde(default)]
    #[validate(nested)]
    pub consumer: ConsumerConfig,

    /// Startup connection retries
    #[serde(default)]
    #[validate(nested)]
    pub startup: StartupConfig,

    /// Graceful shutdown
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&config_path)
    }

    /// Load with `path` as the override file (missing file is fine)
    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(path).required(false))
            // Override with environment variables (prefix: EVENT_WORKER__)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("broker.servers")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Consumer settings derived from the `consumer` and `startup` sections
    pub fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions {
            queue: self.consumer.queue_spec(),
            dead_letter_after: self.consumer.dead_letter_after,
            resubscribe: self.startup.retry_policy(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ConsumerConfig {
    /// Durable queue name
    #[serde(default = "default_queue")]
    #[validate(length(min = 1))]
    pub queue: String,

    /// Queue survives broker restarts
    #[serde(default = "default_true")]
    pub durable: bool,

    /// Maximum deliveries in processing at once
    #[serde(default = "default_prefetch")]
    #[validate(range(min = 1))]
    pub prefetch: usize,

    /// Dead-letter malformed payloads after this many deliveries (unset: requeue forever)
    #[serde(default)]
    #[validate(range(min = 1))]
    pub dead_letter_after: Option<u64>,

    /// Delay before the broker redelivers a requeued message (milliseconds)
    #[serde(default)]
    pub requeue_delay_ms: Option<u64>,
}

impl ConsumerConfig {
    pub fn queue_spec(&self) -> QueueSpec {
        QueueSpec {
            durable: self.durable,
            ..QueueSpec::new(self.queue.clone(), self.prefetch)
        }
    }

    pub fn requeue_delay(&self) -> Option<Duration> {
        self.requeue_delay_ms.map(Duration::from_millis)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queue: default_queue(),
            durable: true,
            prefetch: default_prefetch(),
            dead_letter_after: None,
            requeue_delay_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StartupConfig {
    /// Connection attempts per target before giving up
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1))]
    pub max_attempts: u32,

    /// Pause between attempts (milliseconds)
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl StartupConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_interval())
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Longest wait for in-flight messages after a termination signal (seconds)
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON
    #[serde(default)]
    pub json_logs: bool,

    /// Health and metrics endpoint
    #[serde(default)]
    pub health: HealthConfig,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            health: HealthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_health_port")]
    pub port: u16,
}

impl HealthConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_health_port(),
        }
    }
}

fn default_queue() -> String {
    "events".to_string()
}

fn default_prefetch() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    30
}

fn default_retry_interval_ms() -> u64 {
    2000
}

fn default_drain_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_health_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

//! Prometheus metrics for the ingestion worker.
//!
//! Metrics are created eagerly and registered into [`PROMETHEUS_REGISTRY`] by
//! [`init_metrics`]. Recording into a metric before registration is harmless;
//! it only becomes visible on `/metrics` afterwards.
//!
//! # Example
//! ```no_run
//! use devops_event_worker::metrics::{init_metrics, MESSAGES_ACKED_TOTAL};
//!
//! init_metrics().expect("metrics registered");
//! MESSAGES_ACKED_TOTAL.inc();
//! ```

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};

const NAMESPACE: &str = "event_worker";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Consumer Metrics
    // ============================================================================

    /// Deliveries admitted from the broker
    pub static ref MESSAGES_RECEIVED_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("messages_received_total", "Deliveries admitted for processing")
            .namespace(NAMESPACE)
    ).expect("Failed to create MESSAGES_RECEIVED_TOTAL metric");

    /// Deliveries acknowledged after the event was persisted
    pub static ref MESSAGES_ACKED_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("messages_acked_total", "Deliveries acknowledged after persistence")
            .namespace(NAMESPACE)
    ).expect("Failed to create MESSAGES_ACKED_TOTAL metric");

    /// Deliveries handed back to the broker
    ///
    /// Labels: reason (decode, persist, defect)
    pub static ref MESSAGES_REQUEUED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("messages_requeued_total", "Deliveries negatively acknowledged with requeue")
            .namespace(NAMESPACE),
        &["reason"]
    ).expect("Failed to create MESSAGES_REQUEUED_TOTAL metric");

    /// Deliveries moved to the dead-letter subject
    pub static ref MESSAGES_DEAD_LETTERED_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("messages_dead_lettered_total", "Deliveries moved to the dead-letter subject")
            .namespace(NAMESPACE)
    ).expect("Failed to create MESSAGES_DEAD_LETTERED_TOTAL metric");

    /// Delivery handles released without ack or nack (left for redelivery)
    pub static ref DELIVERIES_UNRESOLVED_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("deliveries_unresolved_total", "Delivery handles dropped without resolution")
            .namespace(NAMESPACE)
    ).expect("Failed to create DELIVERIES_UNRESOLVED_TOTAL metric");

    /// Failed attempts to resolve a delivery handle with the broker
    pub static ref RESOLUTION_FAILURES_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("resolution_failures_total", "Broker errors while acking or nacking")
            .namespace(NAMESPACE)
    ).expect("Failed to create RESOLUTION_FAILURES_TOTAL metric");

    /// Messages currently being processed
    pub static ref MESSAGES_IN_FLIGHT: Gauge = Gauge::with_opts(
        Opts::new("messages_in_flight", "Messages currently being processed")
            .namespace(NAMESPACE)
    ).expect("Failed to create MESSAGES_IN_FLIGHT metric");

    /// Time from admission to resolution
    pub static ref PROCESSING_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("processing_duration_seconds", "Message processing duration in seconds")
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0])
    ).expect("Failed to create PROCESSING_DURATION_SECONDS metric");

    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Connection attempts
    ///
    /// Labels: target, outcome
    pub static ref CONNECTION_ATTEMPTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("connection_attempts_total", "Connection attempts by target and outcome")
            .namespace(NAMESPACE),
        &["target", "outcome"]
    ).expect("Failed to create CONNECTION_ATTEMPTS_TOTAL metric");

    /// Current connection state (0=disconnected .. 4=closed)
    ///
    /// Labels: target
    pub static ref CONNECTION_STATE: GaugeVec = GaugeVec::new(
        Opts::new("connection_state", "Connection state by target")
            .namespace(NAMESPACE),
        &["target"]
    ).expect("Failed to create CONNECTION_STATE metric");

    static ref REGISTRATION: Result<(), String> = register_all();
}

fn register_all() -> Result<(), String> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(MESSAGES_RECEIVED_TOTAL.clone()),
        Box::new(MESSAGES_ACKED_TOTAL.clone()),
        Box::new(MESSAGES_REQUEUED_TOTAL.clone()),
        Box::new(MESSAGES_DEAD_LETTERED_TOTAL.clone()),
        Box::new(DELIVERIES_UNRESOLVED_TOTAL.clone()),
        Box::new(RESOLUTION_FAILURES_TOTAL.clone()),
        Box::new(MESSAGES_IN_FLIGHT.clone()),
        Box::new(PROCESSING_DURATION_SECONDS.clone()),
        Box::new(CONNECTION_ATTEMPTS_TOTAL.clone()),
        Box::new(CONNECTION_STATE.clone()),
    ];

    for collector in collectors {
        PROMETHEUS_REGISTRY
            .register(collector)
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// Register all worker metrics. Safe to call more than once.
pub fn init_metrics() -> Result<(), String> {
    REGISTRATION.clone()
}

/// Render the registry in the Prometheus text exposition format
pub fn gather() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&PROMETHEUS_REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

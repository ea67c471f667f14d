//! End-to-end ingestion through an in-memory broker and store

mod common;

use common::{event_payload, options, wait_until, Harness, TestStore};
use devops_event_worker::messaging::{Disposition, InMemoryBroker, QueueSpec};
use devops_event_worker::models::Severity;
use std::sync::Arc;
use std::time::Duration;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn broker() -> InMemoryBroker {
    InMemoryBroker::new(QueueSpec::new("events", 10))
}

#[tokio::test]
async fn test_full_payload_is_stored_verbatim() {
    let broker = broker();
    broker.publish(r#"{"type":"deploy","source":"ci","message":"build ok","severity":"info"}"#);

    let harness = Harness::start(&broker, Arc::new(TestStore::new()), options(10), DRAIN_TIMEOUT);
    let store = harness.store.clone();
    wait_until("event stored", || store.len() == 1).await;
    let report = harness.stop().await;

    let events = store.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "deploy");
    assert_eq!(events[0].source, "ci");
    assert_eq!(events[0].message, "build ok");
    assert_eq!(events[0].severity, Severity::Info);

    let resolutions = broker.resolutions();
    assert_eq!(resolutions.len(), 1);
    assert_eq!(resolutions[0].disposition, Disposition::Ack);
    assert_eq!(report.consumed.acked, 1);
    assert_eq!(broker.ready(), 0);
}

#[tokio::test]
async fn test_empty_object_uses_defaults() {
    let broker = broker();
    broker.publish("{}");

    let harness = Harness::start(&broker, Arc::new(TestStore::new()), options(10), DRAIN_TIMEOUT);
    let store = harness.store.clone();
    wait_until("event stored", || store.len() == 1).await;
    harness.stop().await;

    let event = &store.events()[0];
    assert_eq!(
        (
            event.event_type.as_str(),
            event.source.as_str(),
            event.message.as_str(),
            event.severity.as_str()
        ),
        ("unknown", "worker", "", "info")
    );
}

#[tokio::test]
async fn test_unknown_fields_and_severity_are_tolerated() {
    let broker = broker();
    broker.publish(r#"{"type":"status","severity":"NOTICE","build":42}"#);

    let harness = Harness::start(&broker, Arc::new(TestStore::new()), options(10), DRAIN_TIMEOUT);
    let store = harness.store.clone();
    wait_until("event stored", || store.len() == 1).await;
    harness.stop().await;

    let event = &store.events()[0];
    assert_eq!(event.event_type, "status");
    assert_eq!(event.source, "worker");
    assert_eq!(event.severity.as_str(), "NOTICE");
}

#[tokio::test]
async fn test_severity_is_stored_as_sent() {
    let broker = broker();
    broker.publish(r#"{"type":"deploy","source":"ci","message":"build ok","severity":"WARNING"}"#);

    let harness = Harness::start(&broker, Arc::new(TestStore::new()), options(10), DRAIN_TIMEOUT);
    let store = harness.store.clone();
    wait_until("event stored", || store.len() == 1).await;
    harness.stop().await;

    assert_eq!(store.events()[0].severity.as_str(), "WARNING");
}

#[tokio::test]
async fn test_malformed_payload_is_requeued_without_a_row() {
    let broker = broker();
    broker.publish("not json");

    let harness = Harness::start(&broker, Arc::new(TestStore::new()), options(1), DRAIN_TIMEOUT);
    let store = harness.store.clone();
    wait_until("redeliveries", || broker.resolutions().len() >= 3).await;
    let report = harness.stop().await;

    assert_eq!(store.len(), 0);
    assert_eq!(store.attempts(), 0);
    assert!(broker
        .resolutions()
        .iter()
        .all(|r| r.disposition == Disposition::Requeue));
    assert_eq!(report.consumed.acked, 0);
    // Still on the queue for the next consumer
    assert_eq!(broker.ready(), 1);
}

#[tokio::test]
async fn test_non_object_json_is_malformed() {
    let broker = broker();
    broker.publish("[1, 2, 3]");
    broker.publish(event_payload("deploy", "ci"));

    let harness = Harness::start(&broker, Arc::new(TestStore::new()), options(1), DRAIN_TIMEOUT);
    let store = harness.store.clone();
    wait_until("valid event stored", || store.len() == 1).await;
    harness.stop().await;

    assert_eq!(store.events()[0].event_type, "deploy");
    assert!(broker
        .resolutions()
        .iter()
        .any(|r| r.disposition == Disposition::Requeue));
}

#[tokio::test]
async fn test_each_message_is_stored_once() {
    let broker = broker();
    for i in 0..25 {
        broker.publish(event_payload(&format!("deploy-{}", i), "ci"));
    }

    let harness = Harness::start(&broker, Arc::new(TestStore::new()), options(4), DRAIN_TIMEOUT);
    let store = harness.store.clone();
    wait_until("all events stored", || store.len() == 25).await;
    let report = harness.stop().await;

    let mut types: Vec<String> = store.events().into_iter().map(|e| e.event_type).collect();
    types.sort();
    types.dedup();
    assert_eq!(types.len(), 25);

    assert_eq!(report.consumed.admitted, 25);
    assert_eq!(report.consumed.acked, 25);
    assert_eq!(broker.resolutions().len(), 25);
    assert_eq!(broker.outstanding(), 0);
}

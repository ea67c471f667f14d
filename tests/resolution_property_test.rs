//! Every delivery is resolved exactly once, whatever the mix of outcomes

mod common;

use common::{event_payload, options, wait_until, Harness, Step, TestStore};
use devops_event_worker::messaging::{Disposition, InMemoryBroker, QueueSpec};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Scenario {
    /// `true` for a well-formed payload
    messages: Vec<bool>,
    /// Store outcomes for the first inserts
    script: Vec<Step>,
    prefetch: usize,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => Just(Step::Succeed),
        2 => Just(Step::Fail),
        1 => Just(Step::Panic),
    ]
}

fn scenario() -> impl Strategy<Value = Scenario> {
    (
        prop::collection::vec(prop::bool::weighted(0.8), 1..12),
        prop::collection::vec(step(), 0..16),
        1usize..5,
    )
        .prop_map(|(messages, script, prefetch)| Scenario {
            messages,
            script,
            prefetch,
        })
}

async fn run_scenario(scenario: Scenario) {
    let broker = InMemoryBroker::new(QueueSpec::new("events", scenario.prefetch));
    for (i, well_formed) in scenario.messages.iter().enumerate() {
        if *well_formed {
            broker.publish(event_payload("deploy", &format!("ci-{}", i)));
        } else {
            broker.publish(format!("{{truncated-{}", i));
        }
    }
    let valid = scenario.messages.iter().filter(|m| **m).count();
    let malformed = scenario.messages.len() - valid;

    let mut options = options(scenario.prefetch);
    options.dead_letter_after = Some(2);

    let store = Arc::new(TestStore::new().with_script(scenario.script.clone()));
    let harness = Harness::start(&broker, store.clone(), options, Duration::from_secs(5));
    wait_until("every message settled", || {
        store.len() == valid && broker.dead_letters().len() == malformed
    })
    .await;
    let report = harness.stop().await;

    let resolutions = broker.resolutions();
    let tags: HashSet<u64> = resolutions.iter().map(|r| r.tag).collect();
    assert_eq!(tags.len(), resolutions.len(), "a delivery was resolved twice");

    let acks = resolutions
        .iter()
        .filter(|r| r.disposition == Disposition::Ack)
        .count();
    let rejects = resolutions
        .iter()
        .filter(|r| r.disposition == Disposition::Reject)
        .count();
    assert_eq!(acks, valid);
    assert_eq!(rejects, malformed);

    // One row per message, no duplicates
    assert_eq!(store.len(), valid);
    assert_eq!(report.consumed.acked as usize, valid);
    assert_eq!(report.consumed.admitted as usize, resolutions.len());
    assert_eq!(broker.ready(), 0);
    assert_eq!(broker.outstanding(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_each_delivery_resolved_once(scenario in scenario()) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_scenario(scenario));
    }
}

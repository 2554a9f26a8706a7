//! Unit tests for in-flight edit set tracking.

use std::time::Duration;

use agent_steward::models::AgentId;
use agent_steward::pipeline::InFlightTracker;

#[test]
fn guards_count_per_agent() {
    let tracker = InFlightTracker::new();
    let one = AgentId::slot(1);
    let two = AgentId::slot(2);

    let a = tracker.begin(&one);
    let b = tracker.begin(&one);
    assert_eq!(tracker.count(&one), 2);
    assert_eq!(tracker.count(&two), 0);

    drop(a);
    assert_eq!(tracker.count(&one), 1);
    drop(b);
    assert_eq!(tracker.count(&one), 0);
}

#[tokio::test]
async fn wait_idle_returns_immediately_when_nothing_in_flight() {
    let tracker = InFlightTracker::new();
    tokio::time::timeout(Duration::from_secs(1), tracker.wait_idle(&AgentId::slot(1)))
        .await
        .expect("idle agent does not wait");
}

#[tokio::test]
async fn wait_idle_blocks_until_guard_drops() {
    let tracker = InFlightTracker::new();
    let agent = AgentId::slot(1);
    let guard = tracker.begin(&agent);

    let waiter = {
        let tracker = tracker.clone();
        let agent = agent.clone();
        tokio::spawn(async move { tracker.wait_idle(&agent).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished(), "waiter must block while in flight");

    // Another agent's work does not matter.
    let _other = tracker.begin(&AgentId::slot(2));
    drop(guard);

    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter released")
        .expect("join");
}

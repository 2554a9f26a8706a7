//! Lifecycle manager: resume, restart, quarantine and release.

use std::time::Duration;

use agent_steward::models::{AgentState, Direction, Directive, EventKind, Payload};
use agent_steward::AppError;

use super::test_helpers::{eventually, harness, text, within, Harness};

#[tokio::test]
async fn resume_redelivers_oldest_pending_task_without_consuming_it() {
    let h = harness(1).await;
    let agent = Harness::agent(1);
    let first = h
        .bus
        .publish(&agent, Direction::Inbound, text("task one"))
        .await
        .expect("publish");
    let second = h
        .bus
        .publish(&agent, Direction::Inbound, text("task two"))
        .await
        .expect("publish");

    assert_eq!(h.lifecycle.resume(&agent).await.expect("resume"), Some(first.id.clone()));
    assert_eq!(h.lifecycle.resume(&agent).await.expect("resume"), Some(first.id.clone()));
    assert_eq!(
        h.runtime.deliveries_for(&agent),
        vec![first.id.clone(), first.id.clone()]
    );

    h.bus
        .publish_reply(&agent, text("done with one"), first.id.clone())
        .await
        .expect("reply");
    assert_eq!(h.lifecycle.resume(&agent).await.expect("resume"), Some(second.id));
}

#[tokio::test]
async fn resume_skips_directives_and_empty_mailboxes() {
    let h = harness(1).await;
    let agent = Harness::agent(1);
    assert_eq!(h.lifecycle.resume(&agent).await.expect("resume"), None);

    h.bus
        .publish(&agent, Direction::Inbound, Payload::Directive(Directive::Resume))
        .await
        .expect("publish");
    assert_eq!(h.lifecycle.resume(&agent).await.expect("resume"), None);
    assert!(h.runtime.deliveries_for(&agent).is_empty());
}

#[tokio::test]
async fn restart_reinitializes_context_and_redelivers_pending() {
    let mut h = harness(2).await;
    let agent = Harness::agent(1);
    let task = h
        .bus
        .publish(&agent, Direction::Inbound, text("task"))
        .await
        .expect("publish");
    h.clock.advance(Duration::from_secs(5));

    let generation = h.lifecycle.restart(&agent).await.expect("restart");

    assert_eq!(generation, 1);
    let record = h.bus.activity(&agent).expect("activity");
    assert_eq!(record.state, AgentState::Restarting);
    assert_eq!(record.generation, 1);
    assert_eq!(record.restarted_at.map(|t| t.as_millis()), Some(5_000));
    assert_eq!(h.runtime.teardown_count(&agent), 1);
    assert_eq!(h.runtime.init_count(&agent), 1);
    assert_eq!(h.runtime.deliveries_for(&agent), vec![task.id]);
    assert_eq!(h.drain_events(), vec![(EventKind::Restarted, agent.clone())]);

    // Fresh output brings the agent back.
    h.bus
        .publish(&agent, Direction::Outbound, text("back"))
        .await
        .expect("publish");
    assert_eq!(h.bus.activity(&agent).expect("activity").state, AgentState::Active);

    // The other agent was never touched.
    let other = Harness::agent(2);
    assert_eq!(h.runtime.teardown_count(&other), 0);
    assert_eq!(h.bus.activity(&other).expect("activity").generation, 0);
}

#[tokio::test]
async fn second_restart_while_one_runs_is_refused() {
    let h = harness(1).await;
    let agent = Harness::agent(1);
    let gate = h.runtime.gate_init(&agent);

    let lifecycle = h.lifecycle.clone();
    let running = {
        let agent = agent.clone();
        tokio::spawn(async move { lifecycle.restart(&agent).await })
    };
    let lifecycle = h.lifecycle.clone();
    let watched = agent.clone();
    assert!(eventually(Duration::from_secs(5), || lifecycle.is_restarting(&watched)).await);

    let err = h.lifecycle.restart(&agent).await.expect_err("in progress");
    assert_eq!(err, AppError::RestartInProgress(agent.to_string()));
    assert!(err.is_transient());

    gate.notify_one();
    assert_eq!(within(running).await.expect("join").expect("restart"), 1);
    assert!(!h.lifecycle.is_restarting(&agent));
}

#[tokio::test]
async fn restart_of_agent_still_waiting_for_output_is_refused() {
    let h = harness(1).await;
    let agent = Harness::agent(1);
    h.lifecycle.restart(&agent).await.expect("restart");

    let err = h.lifecycle.restart(&agent).await.expect_err("still restarting");
    assert!(matches!(err, AppError::RestartInProgress(_)));
    assert_eq!(h.bus.activity(&agent).expect("activity").generation, 1);
}

#[tokio::test]
async fn restart_waits_for_in_flight_edit_sets() {
    let h = harness(1).await;
    let agent = Harness::agent(1);
    let in_flight = h.inflight.begin(&agent);

    let lifecycle = h.lifecycle.clone();
    let restart = {
        let agent = agent.clone();
        tokio::spawn(async move { lifecycle.restart(&agent).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.runtime.teardown_count(&agent), 0, "teardown waits for in-flight work");
    assert_eq!(h.bus.activity(&agent).expect("activity").state, AgentState::Restarting);

    drop(in_flight);
    within(restart).await.expect("join").expect("restart");
    assert_eq!(h.runtime.teardown_count(&agent), 1);
}

#[tokio::test]
async fn failed_initialization_quarantines() {
    let mut h = harness(1).await;
    let agent = Harness::agent(1);
    h.runtime.fail_init(&agent, true);

    let err = h.lifecycle.restart(&agent).await.expect_err("init fails");
    assert!(matches!(err, AppError::Runtime(_)));
    assert_eq!(h.bus.activity(&agent).expect("activity").state, AgentState::Quarantined);
    assert_eq!(h.drain_events(), vec![(EventKind::Quarantined, agent.clone())]);

    assert_eq!(
        h.lifecycle.resume(&agent).await.expect_err("quarantined"),
        AppError::Quarantined(agent.to_string())
    );
    assert_eq!(
        h.lifecycle.restart(&agent).await.expect_err("quarantined"),
        AppError::Quarantined(agent.to_string())
    );
}

#[tokio::test]
async fn release_returns_quarantined_agent_to_active() {
    let h = harness(1).await;
    let agent = Harness::agent(1);
    assert!(matches!(
        h.lifecycle.release(&agent).await,
        Err(AppError::NotFound(_))
    ));

    h.lifecycle.quarantine(&agent, "operator test").expect("quarantine");
    h.clock.advance(Duration::from_secs(300));
    h.lifecycle.release(&agent).await.expect("release");

    let record = h.bus.activity(&agent).expect("activity");
    assert_eq!(record.state, AgentState::Active);
    assert_eq!(record.last_outbound.as_millis(), 300_000);
    assert_eq!(h.runtime.init_count(&agent), 1);
}

#[tokio::test]
async fn release_keeps_quarantine_when_context_cannot_start() {
    let h = harness(1).await;
    let agent = Harness::agent(1);
    h.lifecycle.quarantine(&agent, "operator test").expect("quarantine");
    h.runtime.fail_init(&agent, true);

    assert!(matches!(h.lifecycle.release(&agent).await, Err(AppError::Runtime(_))));
    assert_eq!(h.bus.activity(&agent).expect("activity").state, AgentState::Quarantined);
}

#[tokio::test]
async fn start_all_quarantines_only_failing_agents() {
    let h = harness(3).await;
    h.runtime.fail_init(&Harness::agent(2), true);

    h.lifecycle.start_all().await;

    let states: Vec<AgentState> = h.bus.snapshot().into_iter().map(|r| r.state).collect();
    assert_eq!(
        states,
        vec![AgentState::Active, AgentState::Quarantined, AgentState::Active]
    );
}

#[tokio::test]
async fn start_all_delivers_tasks_left_pending() {
    let h = harness(2).await;
    let agent = Harness::agent(1);
    let task = h
        .bus
        .publish(&agent, Direction::Inbound, text("unfinished"))
        .await
        .expect("publish");
    h.bus
        .publish(&agent, Direction::Inbound, Payload::Directive(Directive::Resume))
        .await
        .expect("publish");
    let done = h
        .bus
        .publish(&agent, Direction::Inbound, text("finished"))
        .await
        .expect("publish");
    h.bus.acknowledge(&done.id).await.expect("ack");

    h.lifecycle.start_all().await;

    assert_eq!(h.runtime.deliveries_for(&agent), vec![task.id]);
    assert!(h.runtime.deliveries_for(&Harness::agent(2)).is_empty());
}

#[tokio::test]
async fn unknown_agent_is_rejected() {
    let h = harness(1).await;
    let ghost = agent_steward::models::AgentId::new("agent-9");
    assert!(matches!(
        h.lifecycle.restart(&ghost).await,
        Err(AppError::UnknownAgent(_))
    ));
    assert!(matches!(
        h.lifecycle.resume(&ghost).await,
        Err(AppError::UnknownAgent(_))
    ));
}

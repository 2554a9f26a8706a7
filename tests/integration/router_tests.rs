//! Inbound router: task delivery and directive execution.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use agent_steward::models::{AgentState, Direction, Directive, Payload};
use agent_steward::orchestrator::spawn_inbound_router;

use super::test_helpers::{eventually, harness, text, within, Harness};

#[tokio::test]
async fn tasks_are_delivered_to_their_agent() {
    let h = harness(2).await;
    let cancel = CancellationToken::new();
    let router = spawn_inbound_router(&h.bus, h.lifecycle.clone(), h.runtime_dyn(), cancel.clone());

    let task = h
        .bus
        .publish(&Harness::agent(2), Direction::Inbound, text("fix the parser"))
        .await
        .expect("publish");

    let runtime = h.runtime.clone();
    assert!(
        eventually(Duration::from_secs(5), || {
            runtime.deliveries_for(&Harness::agent(2)) == vec![task.id.clone()]
        })
        .await
    );
    assert!(h.runtime.deliveries_for(&Harness::agent(1)).is_empty());

    cancel.cancel();
    within(router).await.expect("router stops");
}

#[tokio::test]
async fn restart_directive_runs_once_even_when_replayed() {
    let h = harness(1).await;
    let agent = Harness::agent(1);
    let directive = h
        .bus
        .publish(&agent, Direction::Inbound, Payload::Directive(Directive::Restart))
        .await
        .expect("publish");

    let cancel = CancellationToken::new();
    let router = spawn_inbound_router(&h.bus, h.lifecycle.clone(), h.runtime_dyn(), cancel.clone());
    let bus = h.bus.clone();
    let watched = agent.clone();
    assert!(
        eventually(Duration::from_secs(5), || {
            bus.activity(&watched).map(|r| r.generation) == Ok(1)
        })
        .await
    );
    cancel.cancel();
    within(router).await.expect("router stops");

    let pending = h.bus.unacknowledged(&agent).await.expect("pending");
    assert!(pending.iter().all(|m| m.id != directive.id), "directive acknowledged");

    // A fresh router replays the retained log from the start.
    let cancel = CancellationToken::new();
    let replay = spawn_inbound_router(&h.bus, h.lifecycle.clone(), h.runtime_dyn(), cancel.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    within(replay).await.expect("router stops");

    assert_eq!(h.bus.activity(&agent).expect("activity").generation, 1);
    assert_eq!(h.runtime.init_count(&agent), 1);
}

#[tokio::test]
async fn resume_directive_redelivers_pending_task() {
    let h = harness(1).await;
    let agent = Harness::agent(1);
    let task = h
        .bus
        .publish(&agent, Direction::Inbound, text("write the docs"))
        .await
        .expect("publish");
    h.clock.advance(Duration::from_secs(60));
    assert!(h.lifecycle.request_resume(&agent).await.expect("request"));

    let cancel = CancellationToken::new();
    let router = spawn_inbound_router(&h.bus, h.lifecycle.clone(), h.runtime_dyn(), cancel.clone());

    // Once as a task, once more on resume.
    let runtime = h.runtime.clone();
    let watched = agent.clone();
    assert!(
        eventually(Duration::from_secs(5), || {
            runtime.deliveries_for(&watched) == vec![task.id.clone(), task.id.clone()]
        })
        .await
    );
    cancel.cancel();
    within(router).await.expect("router stops");

    let pending = h.bus.unacknowledged(&agent).await.expect("pending");
    assert_eq!(pending.len(), 1, "only the task stays pending");
    assert_eq!(pending[0].id, task.id);
}

#[tokio::test]
async fn restart_supersedes_a_pending_resume() {
    let h = harness(1).await;
    let agent = Harness::agent(1);
    let task = h
        .bus
        .publish(&agent, Direction::Inbound, text("write the docs"))
        .await
        .expect("publish");
    h.clock.advance(Duration::from_secs(60));
    assert!(h.lifecycle.request_resume(&agent).await.expect("resume"));
    h.clock.advance(Duration::from_secs(60));
    assert!(h
        .lifecycle
        .request_restart(&agent, AgentState::Idle)
        .await
        .expect("restart"));

    let cancel = CancellationToken::new();
    let router = spawn_inbound_router(&h.bus, h.lifecycle.clone(), h.runtime_dyn(), cancel.clone());

    let bus = h.bus.clone();
    let watched = agent.clone();
    assert!(
        eventually(Duration::from_secs(5), || {
            bus.activity(&watched).map(|r| r.generation) == Ok(1)
        })
        .await
    );
    cancel.cancel();
    within(router).await.expect("router stops");

    // Task routed once, redelivered once by the restart; the resume did nothing.
    assert_eq!(h.runtime.deliveries_for(&agent), vec![task.id.clone(), task.id.clone()]);
    let pending = h.bus.unacknowledged(&agent).await.expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, task.id);
}

#[tokio::test]
async fn quarantined_agent_gets_no_deliveries() {
    let h = harness(1).await;
    let agent = Harness::agent(1);
    h.lifecycle.quarantine(&agent, "test").expect("quarantine");

    let cancel = CancellationToken::new();
    let router = spawn_inbound_router(&h.bus, h.lifecycle.clone(), h.runtime_dyn(), cancel.clone());
    h.bus
        .publish(&agent, Direction::Inbound, text("anyone there?"))
        .await
        .expect("publish");
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    within(router).await.expect("router stops");

    assert!(h.runtime.deliveries_for(&agent).is_empty());
    assert_eq!(h.bus.unacknowledged(&agent).await.expect("pending").len(), 1);
}

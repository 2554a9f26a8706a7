//! Child-process runtime against small shell agents.

#![cfg(unix)]

use tokio_util::sync::CancellationToken;

use agent_steward::models::{Direction, Message};
use agent_steward::runtime::{AgentRuntime, ProcessRuntime, SpawnConfig};
use agent_steward::AppError;

use super::test_helpers::{harness, text, within, Harness};

fn runtime(h: &Harness, command: &str, args: &[&str], root: &std::path::Path) -> ProcessRuntime {
    ProcessRuntime::new(
        SpawnConfig {
            command: command.to_owned(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
            workspace_root: root.to_path_buf(),
            max_line_bytes: 64 * 1024,
        },
        h.bus.clone(),
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn delivered_message_reaches_agent_stdin() {
    let h = harness(1).await;
    let dir = tempfile::tempdir().unwrap();
    let agent = Harness::agent(1);
    let rt = runtime(&h, "cat", &[], dir.path());
    let mut outbound = h.bus.subscribe(Direction::Outbound);

    rt.initialize(&agent).await.expect("spawn cat");
    let task = h
        .bus
        .publish(&agent, Direction::Inbound, text("summarize the log"))
        .await
        .unwrap();
    rt.deliver(&agent, &task).await.expect("deliver");

    let echoed = within(outbound.next()).await.expect("agent output");
    assert_eq!(echoed.agent, agent);
    assert_eq!(echoed.reply_to, None);
    let body: Message = serde_json::from_str(echoed.payload.as_text().unwrap()).unwrap();
    assert_eq!(body.id, task.id);

    rt.teardown(&agent).await.expect("teardown");
}

#[tokio::test]
async fn structured_lines_become_replies() {
    let h = harness(1).await;
    let dir = tempfile::tempdir().unwrap();
    let agent = Harness::agent(1);
    let task = h
        .bus
        .publish(&agent, Direction::Inbound, text("hello"))
        .await
        .unwrap();
    let script = format!(
        "printf '%s\\n' '{{\"text\":\"done\",\"reply_to\":\"{}\"}}'; printf 'plain\\n'; cat >/dev/null",
        task.id
    );
    let rt = runtime(&h, "sh", &["-c", &script], dir.path());
    let mut outbound = h.bus.subscribe(Direction::Outbound);

    rt.initialize(&agent).await.unwrap();

    let reply = within(outbound.next()).await.unwrap();
    assert_eq!(reply.payload.as_text(), Some("done"));
    assert_eq!(reply.reply_to, Some(task.id.clone()));
    let mut acked = false;
    for _ in 0..500 {
        if h.bus.unacknowledged(&agent).await.unwrap().is_empty() {
            acked = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(acked, "reply acknowledges the task");

    let plain = within(outbound.next()).await.unwrap();
    assert_eq!(plain.payload.as_text(), Some("plain"));
    assert_eq!(plain.reply_to, None);
    assert!(plain.cycle > reply.cycle);

    rt.teardown(&agent).await.unwrap();
}

#[tokio::test]
async fn agent_runs_in_workspace_with_its_identity() {
    let h = harness(1).await;
    let dir = tempfile::tempdir().unwrap();
    let agent = Harness::agent(1);
    let rt = runtime(
        &h,
        "sh",
        &["-c", "echo \"$STEWARD_AGENT_ID $(pwd)\"; cat >/dev/null"],
        dir.path(),
    );
    let mut outbound = h.bus.subscribe(Direction::Outbound);

    rt.initialize(&agent).await.unwrap();
    let line = within(outbound.next()).await.unwrap();
    let line = line.payload.as_text().unwrap().to_owned();
    let (id, cwd) = line.split_once(' ').unwrap();
    assert_eq!(id, "agent-1");
    assert_eq!(
        std::path::Path::new(cwd).canonicalize().unwrap(),
        dir.path().canonicalize().unwrap()
    );

    rt.teardown(&agent).await.unwrap();
}

#[tokio::test]
async fn double_initialize_and_stopped_delivery_fail() {
    let h = harness(1).await;
    let dir = tempfile::tempdir().unwrap();
    let agent = Harness::agent(1);
    let rt = runtime(&h, "cat", &[], dir.path());
    let task = h
        .bus
        .publish(&agent, Direction::Inbound, text("queued"))
        .await
        .unwrap();

    assert!(matches!(rt.deliver(&agent, &task).await, Err(AppError::Runtime(_))));
    rt.teardown(&agent).await.expect("stopping a stopped agent succeeds");

    rt.initialize(&agent).await.unwrap();
    assert!(matches!(rt.initialize(&agent).await, Err(AppError::Runtime(_))));

    rt.teardown(&agent).await.unwrap();
    assert!(matches!(rt.deliver(&agent, &task).await, Err(AppError::Runtime(_))));

    rt.initialize(&agent).await.expect("restart after teardown");
    rt.deliver(&agent, &task).await.unwrap();
    rt.teardown(&agent).await.unwrap();
}

#[tokio::test]
async fn unknown_agent_and_missing_binary_are_errors() {
    let h = harness(1).await;
    let dir = tempfile::tempdir().unwrap();

    let rt = runtime(&h, "cat", &[], dir.path());
    let stranger = Harness::agent(7);
    assert!(matches!(
        rt.initialize(&stranger).await,
        Err(AppError::UnknownAgent(_))
    ));

    let rt = runtime(&h, "definitely-not-a-real-agent-binary", &[], dir.path());
    assert!(matches!(
        rt.initialize(&Harness::agent(1)).await,
        Err(AppError::Runtime(_))
    ));
}

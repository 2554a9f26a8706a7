//! Child-process agent runtime.
//!
//! Each agent slot runs one child process:
//! - `kill_on_drop(true)` so a dropped context never leaks a process.
//! - `env_clear()` plus an allowlist so supervisor secrets stay private.
//! - Inbound messages are written to stdin as one JSON object per line.
//! - Every stdout line becomes an outbound bus publish. A line that is a
//!   JSON object `{"text": ..., "reply_to": ...}` answers the referenced
//!   inbound message; any other line is published verbatim as text.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use bytes::BytesMut;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{Encoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::codec::LineCodec;
use super::AgentRuntime;
use crate::bus::MessageBus;
use crate::models::{AgentId, Direction, Message, MessageId, Payload};
use crate::{AppError, Result};

/// Environment variables inherited by agent processes; all others are stripped.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// How agent processes are launched.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Agent CLI binary.
    pub command: String,
    /// Arguments passed to the agent CLI.
    pub args: Vec<String>,
    /// Working directory of every agent process.
    pub workspace_root: PathBuf,
    /// Longest stdout line accepted; matches the bus payload budget.
    pub max_line_bytes: usize,
}

/// One line of agent output in structured form.
#[derive(Debug, Deserialize)]
struct AgentLine {
    text: String,
    #[serde(default)]
    reply_to: Option<MessageId>,
}

struct AgentProcess {
    child: Child,
    stdin: ChildStdin,
    reader: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Runtime running every agent as a child process.
pub struct ProcessRuntime {
    config: SpawnConfig,
    bus: MessageBus,
    slots: HashMap<AgentId, Mutex<Option<AgentProcess>>>,
    cancel: CancellationToken,
}

impl ProcessRuntime {
    /// Runtime for the bus's agent pool. No process is started until
    /// [`AgentRuntime::initialize`] is called for a slot.
    #[must_use]
    pub fn new(config: SpawnConfig, bus: MessageBus, cancel: CancellationToken) -> Self {
        let slots = bus
            .agents()
            .into_iter()
            .map(|agent| (agent, Mutex::new(None)))
            .collect();
        Self {
            config,
            bus,
            slots,
            cancel,
        }
    }

    fn slot(&self, agent: &AgentId) -> Result<&Mutex<Option<AgentProcess>>> {
        self.slots
            .get(agent)
            .ok_or_else(|| AppError::UnknownAgent(agent.to_string()))
    }

    fn spawn(&self, agent: &AgentId) -> Result<AgentProcess> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);

        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.env("STEWARD_AGENT_ID", agent.as_str())
            .env("STEWARD_WORKSPACE_ROOT", &self.config.workspace_root);

        cmd.current_dir(&self.config.workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Runtime(format!("failed to spawn agent {agent}: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Runtime("failed to capture agent stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Runtime("failed to capture agent stdout".into()))?;

        let cancel = self.cancel.child_token();
        let reader = tokio::spawn(
            read_output(
                agent.clone(),
                stdout,
                self.config.max_line_bytes,
                self.bus.clone(),
                cancel.clone(),
            )
            .instrument(info_span!("agent_reader", agent = %agent)),
        );

        info!(agent = %agent, pid = child.id(), "agent process started");
        Ok(AgentProcess {
            child,
            stdin,
            reader,
            cancel,
        })
    }
}

impl AgentRuntime for ProcessRuntime {
    fn deliver<'a>(
        &'a self,
        agent: &'a AgentId,
        message: &'a Message,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut slot = self.slot(agent)?.lock().await;
            let process = slot
                .as_mut()
                .ok_or_else(|| AppError::Runtime(format!("agent {agent} is not running")))?;

            let line = serde_json::to_string(message)
                .map_err(|e| AppError::Runtime(format!("failed to serialise message: {e}")))?;
            let mut buf = BytesMut::with_capacity(line.len() + 1);
            LineCodec::new(self.config.max_line_bytes).encode(line, &mut buf)?;

            process
                .stdin
                .write_all(&buf)
                .await
                .map_err(|e| AppError::Runtime(format!("write to agent {agent} failed: {e}")))?;
            process
                .stdin
                .flush()
                .await
                .map_err(|e| AppError::Runtime(format!("flush to agent {agent} failed: {e}")))?;

            debug!(agent = %agent, message_id = %message.id, "message delivered");
            Ok(())
        })
    }

    fn teardown<'a>(&'a self, agent: &'a AgentId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let Some(mut process) = self.slot(agent)?.lock().await.take() else {
                return Ok(());
            };

            process.cancel.cancel();
            drop(process.stdin);
            if let Err(err) = process.child.kill().await {
                warn!(agent = %agent, %err, "failed to kill agent process");
            }
            let _ = process.reader.await;
            info!(agent = %agent, "agent process stopped");
            Ok(())
        })
    }

    fn initialize<'a>(&'a self, agent: &'a AgentId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut slot = self.slot(agent)?.lock().await;
            if slot.is_some() {
                return Err(AppError::Runtime(format!(
                    "agent {agent} is already running"
                )));
            }
            *slot = Some(self.spawn(agent)?);
            Ok(())
        })
    }
}

/// Publish each stdout line of an agent process until EOF or cancellation.
async fn read_output(
    agent: AgentId,
    stdout: ChildStdout,
    max_line_bytes: usize,
    bus: MessageBus,
    cancel: CancellationToken,
) {
    let mut lines = FramedRead::new(stdout, LineCodec::new(max_line_bytes));

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = lines.next() => next,
        };

        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(err)) => {
                warn!(%err, "agent output unreadable, detaching reader");
                break;
            }
            None => {
                warn!("agent process closed its output");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let published = match serde_json::from_str::<AgentLine>(&line) {
            Ok(AgentLine {
                text,
                reply_to: Some(reply_to),
            }) => bus.publish_reply(&agent, Payload::Text(text), reply_to).await,
            Ok(AgentLine { text, reply_to: None }) => {
                bus.publish(&agent, Direction::Outbound, Payload::Text(text))
                    .await
            }
            Err(_) => {
                bus.publish(&agent, Direction::Outbound, Payload::Text(line))
                    .await
            }
        };

        if let Err(err) = published {
            warn!(%err, "failed to publish agent output");
        }
    }
}

//! Inbound router: delivers tasks and executes directives, one worker per agent.
//!
//! Directives are acknowledged before they run, so a directive replayed by
//! an at-least-once subscriber is not executed twice. A resume directive
//! that reaches an agent already headed for restart is dropped: the
//! restart supersedes it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::lifecycle::LifecycleManager;
use crate::bus::MessageBus;
use crate::models::{AgentId, AgentState, Directive, Direction, Message, Payload};
use crate::runtime::AgentRuntime;
use crate::AppError;

/// Spawn the inbound router.
///
/// A restart runs on its agent's worker, so it delays only that agent's
/// deliveries.
#[must_use]
pub fn spawn_inbound_router(
    bus: &MessageBus,
    lifecycle: Arc<LifecycleManager>,
    runtime: Arc<dyn AgentRuntime>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut subscription = bus.subscribe(Direction::Inbound);
    let agents = bus.agents();
    let bus = bus.clone();

    tokio::spawn(
        async move {
            let mut senders: HashMap<AgentId, mpsc::UnboundedSender<Message>> = HashMap::new();
            let mut workers = Vec::with_capacity(agents.len());
            for agent in agents {
                let (tx, rx) = mpsc::unbounded_channel();
                senders.insert(agent.clone(), tx);
                let worker = InboundWorker {
                    bus: bus.clone(),
                    lifecycle: Arc::clone(&lifecycle),
                    runtime: Arc::clone(&runtime),
                };
                workers.push(tokio::spawn(
                    worker
                        .run(rx)
                        .instrument(info_span!("inbound_worker", agent = %agent)),
                ));
            }

            loop {
                let message = tokio::select! {
                    () = cancel.cancelled() => break,
                    next = subscription.next() => match next {
                        Some(message) => message,
                        None => break,
                    },
                };
                if let Some(tx) = senders.get(&message.agent) {
                    if tx.send(message).is_err() {
                        error!("inbound worker exited unexpectedly");
                    }
                }
            }

            drop(senders);
            for worker in workers {
                let _ = worker.await;
            }
            info!("inbound router stopped");
        }
        .instrument(info_span!("inbound_router")),
    )
}

struct InboundWorker {
    bus: MessageBus,
    lifecycle: Arc<LifecycleManager>,
    runtime: Arc<dyn AgentRuntime>,
}

impl InboundWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = rx.recv().await {
            match message.payload {
                Payload::Directive(directive) => self.execute(&message, directive).await,
                Payload::Text(_) => self.deliver(&message).await,
            }
        }
    }

    async fn execute(&self, message: &Message, directive: Directive) {
        let agent = &message.agent;
        match self.bus.unacknowledged(agent).await {
            Ok(pending) if !pending.iter().any(|m| m.id == message.id) => {
                debug!(message_id = %message.id, "directive already handled");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "cannot check directive status");
                return;
            }
        }
        if let Err(err) = self.bus.acknowledge(&message.id).await {
            warn!(%err, message_id = %message.id, "failed to acknowledge directive");
            return;
        }

        let result = match directive {
            Directive::Resume => {
                let state = self.bus.activity(agent).map(|record| record.state);
                if matches!(
                    state,
                    Ok(AgentState::Stalled | AgentState::Restarting | AgentState::Quarantined)
                ) {
                    debug!(message_id = %message.id, "resume superseded");
                    return;
                }
                self.lifecycle.resume(agent).await.map(|_| ())
            }
            Directive::Restart => self.lifecycle.restart(agent).await.map(|_| ()),
        };

        match result {
            Ok(()) => {}
            Err(err @ AppError::RestartInProgress(_)) => debug!(%err, "directive skipped"),
            Err(err) => warn!(%err, ?directive, "directive failed"),
        }
    }

    async fn deliver(&self, message: &Message) {
        let agent = &message.agent;
        let state = self.bus.activity(agent).map(|record| record.state);
        if matches!(state, Ok(AgentState::Quarantined)) || self.lifecycle.is_restarting(agent) {
            debug!(message_id = %message.id, "delivery deferred until agent is back");
            return;
        }
        if let Err(err) = self.runtime.deliver(agent, message).await {
            warn!(%err, message_id = %message.id, "delivery failed; message stays pending");
        }
    }
}

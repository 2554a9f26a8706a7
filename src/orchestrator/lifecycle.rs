//! Agent lifecycle manager: executes resume and restart directives.
//!
//! All liveness state transitions outside plain message observation go
//! through this type, so the watchdog never writes the activity ledger
//! directly. Restarts are scoped to one agent; other agents keep running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::audit::Notifier;
use crate::bus::MessageBus;
use crate::models::{AgentId, AgentState, Directive, Direction, EventKind, MessageId, Payload};
use crate::pipeline::InFlightTracker;
use crate::runtime::AgentRuntime;
use crate::{AppError, Result};

#[derive(Default)]
struct AgentContext {
    restarting: AtomicBool,
}

/// Clears the per-agent restart flag when a restart ends, however it ends.
struct RestartGuard<'a>(&'a AtomicBool);

impl Drop for RestartGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Executes liveness transitions and directives for the agent pool.
pub struct LifecycleManager {
    bus: MessageBus,
    runtime: Arc<dyn AgentRuntime>,
    inflight: InFlightTracker,
    notifier: Notifier,
    contexts: HashMap<AgentId, AgentContext>,
}

impl LifecycleManager {
    /// Manager for the bus's agent pool.
    #[must_use]
    pub fn new(
        bus: MessageBus,
        runtime: Arc<dyn AgentRuntime>,
        inflight: InFlightTracker,
        notifier: Notifier,
    ) -> Self {
        let contexts = bus
            .agents()
            .into_iter()
            .map(|agent| (agent, AgentContext::default()))
            .collect();
        Self {
            bus,
            runtime,
            inflight,
            notifier,
            contexts,
        }
    }

    fn context(&self, agent: &AgentId) -> Result<&AgentContext> {
        self.contexts
            .get(agent)
            .ok_or_else(|| AppError::UnknownAgent(agent.to_string()))
    }

    /// Whether a restart of `agent` is currently running.
    #[must_use]
    pub fn is_restarting(&self, agent: &AgentId) -> bool {
        self.contexts
            .get(agent)
            .is_some_and(|ctx| ctx.restarting.load(Ordering::SeqCst))
    }

    /// Start every agent's execution context.
    ///
    /// Tasks left unacknowledged by a previous run are delivered to the
    /// fresh context. An agent whose context fails to start is quarantined;
    /// the others are unaffected.
    pub async fn start_all(&self) {
        for agent in self.bus.agents() {
            match self.runtime.initialize(&agent).await {
                Ok(()) => self.redeliver_pending(&agent).await,
                Err(err) => {
                    error!(agent = %agent, %err, "agent failed to start");
                    if let Err(err) = self.quarantine(&agent, &err.to_string()) {
                        error!(agent = %agent, %err, "failed to quarantine agent");
                    }
                }
            }
        }
    }

    /// Deliver every unacknowledged task of `agent`, oldest first.
    /// Directives are left to the inbound router.
    async fn redeliver_pending(&self, agent: &AgentId) {
        match self.bus.unacknowledged(agent).await {
            Ok(pending) => {
                for message in pending.iter().filter(|m| m.payload.as_directive().is_none()) {
                    if let Err(err) = self.runtime.deliver(agent, message).await {
                        warn!(agent = %agent, %err, message_id = %message.id, "redelivery failed");
                        break;
                    }
                }
            }
            Err(err) => warn!(agent = %agent, %err, "could not list pending messages"),
        }
    }

    /// Move `agent` from `expected` to `next` if it is still `expected`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownAgent` if `agent` is not in the pool.
    pub fn observe_state(
        &self,
        agent: &AgentId,
        expected: AgentState,
        next: AgentState,
    ) -> Result<bool> {
        self.bus.ledger().compare_and_set(agent, expected, next)
    }

    /// Soft-timeout escalation: `Active → Idle` and publish a resume directive.
    ///
    /// Returns `false` if the agent was no longer `Active`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownAgent` or the bus's publish error.
    pub async fn request_resume(&self, agent: &AgentId) -> Result<bool> {
        if !self.observe_state(agent, AgentState::Active, AgentState::Idle)? {
            return Ok(false);
        }
        let directive = self
            .bus
            .publish(agent, Direction::Inbound, Payload::Directive(Directive::Resume))
            .await?;
        self.notifier
            .emit(EventKind::Resumed, agent, format!("resume directive {}", directive.id));
        info!(agent = %agent, message_id = %directive.id, "resume directive issued");
        Ok(true)
    }

    /// Hard-timeout escalation: `observed → Stalled` and publish a restart directive.
    ///
    /// Returns `false` if the agent was no longer in `observed`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownAgent` or the bus's publish error.
    pub async fn request_restart(&self, agent: &AgentId, observed: AgentState) -> Result<bool> {
        let now = self.bus.now();
        let stalled = self.bus.ledger().update(agent, |record| {
            if record.state != observed || !observed.can_transition_to(AgentState::Stalled) {
                return false;
            }
            record.state = AgentState::Stalled;
            record.stalled_at = Some(now);
            record.restart_requests = 1;
            true
        })?;
        if !stalled {
            return Ok(false);
        }
        let directive = self
            .bus
            .publish(agent, Direction::Inbound, Payload::Directive(Directive::Restart))
            .await?;
        self.notifier
            .emit(EventKind::Stalled, agent, format!("restart directive {}", directive.id));
        warn!(agent = %agent, message_id = %directive.id, "restart directive issued");
        Ok(true)
    }

    /// Publish another restart directive for an agent still `Stalled`,
    /// after the previous one went unexecuted.
    ///
    /// Returns `false` if the agent left `Stalled` meanwhile.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownAgent` or the bus's publish error.
    pub async fn reissue_restart(&self, agent: &AgentId) -> Result<bool> {
        let now = self.bus.now();
        let attempt = self.bus.ledger().update(agent, |record| {
            if record.state != AgentState::Stalled {
                return None;
            }
            record.stalled_at = Some(now);
            record.restart_requests += 1;
            Some(record.restart_requests)
        })?;
        let Some(attempt) = attempt else {
            return Ok(false);
        };
        let directive = self
            .bus
            .publish(agent, Direction::Inbound, Payload::Directive(Directive::Restart))
            .await?;
        warn!(agent = %agent, message_id = %directive.id, attempt, "restart directive reissued");
        Ok(true)
    }

    /// Redeliver the oldest unacknowledged inbound message of `agent`.
    ///
    /// Nothing is removed from the mailbox; calling this repeatedly only
    /// redelivers the same message. Returns the redelivered id, or `None`
    /// when the mailbox is empty or a restart has superseded the resume.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Quarantined`, the mailbox's error, or the runtime's
    /// delivery error.
    pub async fn resume(&self, agent: &AgentId) -> Result<Option<MessageId>> {
        let context = self.context(agent)?;
        let state = self.bus.activity(agent)?.state;
        if state == AgentState::Quarantined {
            return Err(AppError::Quarantined(agent.to_string()));
        }
        if context.restarting.load(Ordering::SeqCst) || state == AgentState::Restarting {
            debug!(agent = %agent, "resume superseded by restart");
            return Ok(None);
        }

        let pending = self.bus.unacknowledged(agent).await?;
        let Some(oldest) = pending.into_iter().find(|m| m.payload.as_directive().is_none()) else {
            debug!(agent = %agent, "nothing to resume");
            return Ok(None);
        };

        self.runtime.deliver(agent, &oldest).await?;
        info!(agent = %agent, message_id = %oldest.id, "oldest pending message redelivered");
        Ok(Some(oldest.id))
    }

    /// Tear down and reinitialize the execution context of `agent`.
    ///
    /// Waits for the agent's in-flight edit sets to finish first. On
    /// success the agent is `Restarting` until it publishes fresh output;
    /// every unacknowledged inbound message is redelivered to the new
    /// context. If the context cannot be rebuilt the agent is quarantined.
    ///
    /// Returns the new generation number.
    ///
    /// # Errors
    ///
    /// - `AppError::RestartInProgress` if a restart of `agent` is running.
    /// - `AppError::Quarantined` if the agent is quarantined.
    /// - The runtime's error if teardown or initialization fails.
    pub async fn restart(&self, agent: &AgentId) -> Result<u64> {
        let context = self.context(agent)?;
        if context
            .restarting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::RestartInProgress(agent.to_string()));
        }
        let _guard = RestartGuard(&context.restarting);

        self.run_restart(agent)
            .instrument(info_span!("restart", agent = %agent))
            .await
    }

    async fn run_restart(&self, agent: &AgentId) -> Result<u64> {
        let entered = self.bus.ledger().update(agent, |record| {
            if record.state.can_transition_to(AgentState::Restarting) {
                record.state = AgentState::Restarting;
                record.restarted_at = None;
                Ok(())
            } else {
                Err(record.state)
            }
        })?;
        if let Err(state) = entered {
            return Err(match state {
                AgentState::Quarantined => AppError::Quarantined(agent.to_string()),
                _ => AppError::RestartInProgress(agent.to_string()),
            });
        }

        let in_flight = self.inflight.count(agent);
        if in_flight > 0 {
            info!(in_flight, "waiting for in-flight edit sets before teardown");
        }
        self.inflight.wait_idle(agent).await;

        let rebuilt = match self.runtime.teardown(agent).await {
            Ok(()) => self.runtime.initialize(agent).await,
            Err(err) => Err(err),
        };
        if let Err(err) = rebuilt {
            error!(%err, "restart failed");
            self.quarantine(agent, &err.to_string())?;
            return Err(err);
        }

        let now = self.bus.now();
        let generation = self.bus.ledger().update(agent, |record| {
            record.generation += 1;
            record.restarted_at = Some(now);
            record.generation
        })?;

        self.notifier
            .emit(EventKind::Restarted, agent, format!("generation {generation}"));
        info!(generation, "execution context reinitialized");

        self.redeliver_pending(agent).await;

        Ok(generation)
    }

    /// Mark `agent` quarantined. Terminal until [`release`](Self::release).
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownAgent` if `agent` is not in the pool.
    pub fn quarantine(&self, agent: &AgentId, reason: &str) -> Result<()> {
        let changed = self.bus.ledger().update(agent, |record| {
            let changed = record.state != AgentState::Quarantined;
            record.state = AgentState::Quarantined;
            changed
        })?;
        if changed {
            self.notifier.emit(EventKind::Quarantined, agent, reason);
            error!(agent = %agent, reason, "agent quarantined");
        }
        Ok(())
    }

    /// Quarantine and stop the context of an agent the watchdog gave up on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownAgent` if `agent` is not in the pool.
    pub async fn quarantine_silent(&self, agent: &AgentId, reason: &str) -> Result<()> {
        self.quarantine(agent, reason)?;
        if let Err(err) = self.runtime.teardown(agent).await {
            warn!(agent = %agent, %err, "failed to stop quarantined agent");
        }
        Ok(())
    }

    /// Operator release of a quarantined agent: start a fresh context and
    /// return it to `Active` with a new silence window.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the agent is not quarantined.
    /// - The runtime's error if the context cannot start; the agent stays quarantined.
    pub async fn release(&self, agent: &AgentId) -> Result<()> {
        if self.bus.activity(agent)?.state != AgentState::Quarantined {
            return Err(AppError::NotFound(format!("{agent} is not quarantined")));
        }

        self.runtime.teardown(agent).await?;
        self.runtime.initialize(agent).await?;

        let now = self.bus.now();
        self.bus.ledger().update(agent, |record| {
            record.state = AgentState::Active;
            record.last_outbound = record.last_outbound.max(now);
            record.last_seen = record.last_seen.max(now);
            record.restarted_at = Some(now);
        })?;
        info!(agent = %agent, "agent released from quarantine");
        Ok(())
    }
}

//! Liveness watchdog.
//!
//! A single periodic task. Each poll reads a fresh snapshot of the activity
//! ledger, so the watchdog holds no state of its own and a restarted
//! watchdog picks up exactly where the ledger says things are. Agents are
//! examined in id order and every escalation goes through the
//! [`LifecycleManager`], one call at a time.
//!
//! Escalation per agent, measured from its last outbound message:
//!
//! | Condition                                          | Action                          |
//! |----------------------------------------------------|---------------------------------|
//! | `Active`, silent ≥ soft timeout                    | `Idle`, resume directive        |
//! | `Active`/`Idle`, silent ≥ hard timeout             | `Stalled`, restart directive    |
//! | `Stalled`, restart not executed within grace       | restart directive reissued      |
//! | `Stalled` after the reissue, grace elapsed again   | `Quarantined`                   |
//! | `Restarting`, no output within restart grace       | `Quarantined`                   |

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use super::lifecycle::LifecycleManager;
use crate::bus::MessageBus;
use crate::clock::Timestamp;
use crate::models::{ActivityRecord, AgentId, AgentState};
use crate::Result;

/// Restart directives issued to a stalled agent before it is quarantined.
pub const MAX_RESTART_REQUESTS: u32 = 2;

/// Watchdog timing.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogSettings {
    /// Silence before a resume directive.
    pub soft_timeout: Duration,
    /// Silence before a restart directive.
    pub hard_timeout: Duration,
    /// Time a restarted agent has to publish output.
    pub restart_grace: Duration,
    /// Poll period.
    pub poll_interval: Duration,
}

/// Escalation taken during one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Resume directive issued.
    Resume(AgentId),
    /// Restart directive issued.
    Restart(AgentId),
    /// Restarted agent stayed silent and was quarantined.
    Quarantine(AgentId),
}

/// Periodic stall detector over the activity ledger.
pub struct Watchdog {
    bus: MessageBus,
    lifecycle: Arc<LifecycleManager>,
    settings: WatchdogSettings,
}

impl Watchdog {
    /// Watchdog over `bus`, escalating through `lifecycle`.
    #[must_use]
    pub fn new(bus: MessageBus, lifecycle: Arc<LifecycleManager>, settings: WatchdogSettings) -> Self {
        Self {
            bus,
            lifecycle,
            settings,
        }
    }

    /// Run one poll at the bus clock's current time.
    ///
    /// Failures for one agent are logged and do not stop the others.
    pub async fn poll_once(&self) -> Vec<WatchdogAction> {
        let now = self.bus.now();
        let mut actions = Vec::new();

        for record in self.bus.snapshot() {
            match self.examine(&record, now).await {
                Ok(Some(action)) => actions.push(action),
                Ok(None) => {}
                Err(err) => error!(agent = %record.agent, %err, "watchdog escalation failed"),
            }
        }

        debug!(at = now.as_millis(), actions = actions.len(), "watchdog poll");
        actions
    }

    async fn examine(&self, record: &ActivityRecord, now: Timestamp) -> Result<Option<WatchdogAction>> {
        let agent = &record.agent;
        let silent_for = now.since(record.last_outbound);

        match record.state {
            AgentState::Quarantined => Ok(None),
            AgentState::Stalled => {
                let Some(stalled_at) = record.stalled_at else {
                    return Ok(None);
                };
                if now.since(stalled_at) < self.settings.restart_grace {
                    return Ok(None);
                }
                if record.restart_requests >= MAX_RESTART_REQUESTS {
                    self.lifecycle
                        .quarantine_silent(agent, "restart directives went unexecuted")
                        .await?;
                    return Ok(Some(WatchdogAction::Quarantine(agent.clone())));
                }
                let issued = self.lifecycle.reissue_restart(agent).await?;
                Ok(issued.then(|| WatchdogAction::Restart(agent.clone())))
            }
            AgentState::Restarting => {
                let Some(restarted_at) = record.restarted_at else {
                    return Ok(None);
                };
                let spoke_since = record.last_outbound >= restarted_at;
                if !spoke_since && now.since(restarted_at) >= self.settings.restart_grace {
                    self.lifecycle
                        .quarantine_silent(agent, "no output within restart grace window")
                        .await?;
                    return Ok(Some(WatchdogAction::Quarantine(agent.clone())));
                }
                Ok(None)
            }
            state @ (AgentState::Active | AgentState::Idle)
                if silent_for >= self.settings.hard_timeout =>
            {
                let issued = self.lifecycle.request_restart(agent, state).await?;
                Ok(issued.then(|| WatchdogAction::Restart(agent.clone())))
            }
            AgentState::Active if silent_for >= self.settings.soft_timeout => {
                let issued = self.lifecycle.request_resume(agent).await?;
                Ok(issued.then(|| WatchdogAction::Resume(agent.clone())))
            }
            AgentState::Active | AgentState::Idle => Ok(None),
        }
    }

    /// Spawn the polling loop. The first poll happens one interval after start.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        let period = self.settings.poll_interval;
        tokio::spawn(
            async move {
                let mut interval =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            info!("watchdog shutting down");
                            break;
                        }
                        _ = interval.tick() => {
                            self.poll_once().await;
                        }
                    }
                }
            }
            .instrument(info_span!("watchdog")),
        )
    }
}

//! Per-agent count of edit sets between apply and commit/discard.
//!
//! The lifecycle manager waits on this before tearing an agent's context
//! down, so a restart never interrupts a half-finished edit set.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::models::AgentId;

/// Shared tracker of in-flight edit sets.
#[derive(Clone)]
pub struct InFlightTracker {
    counts: Arc<watch::Sender<HashMap<AgentId, usize>>>,
}

impl Default for InFlightTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlightTracker {
    /// Tracker with nothing in flight.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(HashMap::new());
        Self {
            counts: Arc::new(tx),
        }
    }

    /// Mark one edit set of `agent` as in flight until the guard drops.
    #[must_use]
    pub fn begin(&self, agent: &AgentId) -> InFlightGuard {
        self.counts.send_modify(|counts| {
            *counts.entry(agent.clone()).or_default() += 1;
        });
        InFlightGuard {
            counts: Arc::clone(&self.counts),
            agent: agent.clone(),
        }
    }

    /// Number of edit sets of `agent` currently in flight.
    #[must_use]
    pub fn count(&self, agent: &AgentId) -> usize {
        self.counts.borrow().get(agent).copied().unwrap_or(0)
    }

    /// Wait until `agent` has nothing in flight.
    pub async fn wait_idle(&self, agent: &AgentId) {
        let mut rx = self.counts.subscribe();
        // The sender lives in `self`, so `wait_for` only errors if it is dropped.
        let _ = rx
            .wait_for(|counts| counts.get(agent).copied().unwrap_or(0) == 0)
            .await;
    }
}

/// Releases one in-flight slot on drop.
pub struct InFlightGuard {
    counts: Arc<watch::Sender<HashMap<AgentId, usize>>>,
    agent: AgentId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counts.send_modify(|counts| {
            if let Some(count) = counts.get_mut(&self.agent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    counts.remove(&self.agent);
                }
            }
        });
    }
}

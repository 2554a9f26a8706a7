//! Agent identity and per-agent liveness record.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// Stable identifier for one slot in the fixed agent pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Wrap an identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier for the 1-based pool slot `n` (`agent-n`).
    #[must_use]
    pub fn slot(n: usize) -> Self {
        Self(format!("agent-{n}"))
    }

    /// Build the identifiers for a pool of `size` agents.
    #[must_use]
    pub fn pool(size: usize) -> Vec<Self> {
        (1..=size).map(Self::slot).collect()
    }

    /// Borrow the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into a text prefix and an optional numeric suffix.
    fn natural_key(&self) -> (&str, Option<u64>) {
        let digits = self.0.bytes().rev().take_while(u8::is_ascii_digit).count();
        let (prefix, suffix) = self.0.split_at(self.0.len() - digits);
        (prefix, suffix.parse().ok())
    }
}

/// Natural ordering so `agent-2` sorts before `agent-10`.
impl Ord for AgentId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.natural_key()
            .cmp(&other.natural_key())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for AgentId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for AgentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Liveness state of an agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Producing outbound messages within the soft timeout.
    Active,
    /// Silent past the soft timeout; a resume directive has been issued.
    Idle,
    /// Silent past the hard timeout; a restart directive has been issued.
    Stalled,
    /// The lifecycle manager is reinitializing the execution context.
    Restarting,
    /// Restart failed; terminal until released by an operator.
    Quarantined,
}

impl AgentState {
    /// Whether a transition from `self` to `next` is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: AgentState) -> bool {
        matches!(
            (self, next),
            (AgentState::Active, AgentState::Idle | AgentState::Stalled)
                | (AgentState::Idle, AgentState::Active | AgentState::Stalled)
                | (
                    AgentState::Active | AgentState::Idle | AgentState::Stalled,
                    AgentState::Restarting
                )
                | (AgentState::Stalled | AgentState::Restarting, AgentState::Active)
                | (
                    AgentState::Stalled | AgentState::Restarting,
                    AgentState::Quarantined
                )
                | (AgentState::Quarantined, AgentState::Active)
        )
    }
}

/// Per-agent activity ledger entry.
///
/// `last_seen` and `last_outbound` never move backwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Agent this record describes.
    pub agent: AgentId,
    /// Timestamp of the most recent message published for this agent.
    pub last_seen: Timestamp,
    /// Timestamp of the most recent outbound message from this agent.
    pub last_outbound: Timestamp,
    /// Cycle number of the most recent message.
    pub last_cycle: u64,
    /// Current liveness state.
    pub state: AgentState,
    /// Number of completed restarts of the execution context.
    pub generation: u64,
    /// When the latest restart completed; `None` while one is running.
    pub restarted_at: Option<Timestamp>,
    /// When the latest restart directive was issued for a stalled agent.
    pub stalled_at: Option<Timestamp>,
    /// Restart directives issued since the agent last entered `Stalled`.
    pub restart_requests: u32,
}

impl ActivityRecord {
    /// Fresh record for an agent observed at `now`.
    #[must_use]
    pub fn new(agent: AgentId, now: Timestamp, last_cycle: u64) -> Self {
        Self {
            agent,
            last_seen: now,
            last_outbound: now,
            last_cycle,
            state: AgentState::Active,
            generation: 0,
            restarted_at: None,
            stalled_at: None,
            restart_requests: 0,
        }
    }
}

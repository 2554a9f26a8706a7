//! Activity ledger: one [`ActivityRecord`] per agent in the fixed pool.
//!
//! Each record sits behind its own lock, so updates for different agents
//! never contend. Readers only ever receive cloned snapshots.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::clock::Timestamp;
use crate::models::{ActivityRecord, AgentId, AgentState};
use crate::{AppError, Result};

/// Store of per-agent activity records with atomic per-record updates.
#[derive(Debug)]
pub struct ActivityLedger {
    records: BTreeMap<AgentId, Mutex<ActivityRecord>>,
}

fn lock(record: &Mutex<ActivityRecord>) -> MutexGuard<'_, ActivityRecord> {
    // Update closures only assign plain fields; a poisoned record is still consistent.
    record.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ActivityLedger {
    /// Build a ledger for `agents`, each starting `Active` at `now`.
    ///
    /// `cycles` supplies a recovered `last_cycle` per agent (missing means 0).
    #[must_use]
    pub fn new(agents: &[AgentId], now: Timestamp, cycles: &BTreeMap<AgentId, u64>) -> Self {
        let records = agents
            .iter()
            .map(|agent| {
                let cycle = cycles.get(agent).copied().unwrap_or_default();
                (
                    agent.clone(),
                    Mutex::new(ActivityRecord::new(agent.clone(), now, cycle)),
                )
            })
            .collect();
        Self { records }
    }

    /// Whether `agent` belongs to the pool.
    #[must_use]
    pub fn contains(&self, agent: &AgentId) -> bool {
        self.records.contains_key(agent)
    }

    /// Pool members in natural id order.
    #[must_use]
    pub fn agents(&self) -> Vec<AgentId> {
        self.records.keys().cloned().collect()
    }

    /// Snapshot of a single record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownAgent` if `agent` is not in the pool.
    pub fn get(&self, agent: &AgentId) -> Result<ActivityRecord> {
        self.update(agent, |record| record.clone())
    }

    /// Consistent per-record snapshot of the whole pool, in id order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ActivityRecord> {
        self.records.values().map(|r| lock(r).clone()).collect()
    }

    /// Apply `f` to the record of `agent` while holding its lock.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownAgent` if `agent` is not in the pool.
    pub fn update<T>(&self, agent: &AgentId, f: impl FnOnce(&mut ActivityRecord) -> T) -> Result<T> {
        let record = self
            .records
            .get(agent)
            .ok_or_else(|| AppError::UnknownAgent(agent.to_string()))?;
        let mut guard = lock(record);
        Ok(f(&mut guard))
    }

    /// Move `agent` from `expected` to `next` if it is currently `expected`.
    ///
    /// Returns `false` without modifying anything when the current state
    /// differs or the transition is not permitted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownAgent` if `agent` is not in the pool.
    pub fn compare_and_set(
        &self,
        agent: &AgentId,
        expected: AgentState,
        next: AgentState,
    ) -> Result<bool> {
        self.update(agent, |record| {
            if record.state == expected && expected.can_transition_to(next) {
                record.state = next;
                true
            } else {
                false
            }
        })
    }
}

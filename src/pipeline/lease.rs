//! Per-file leases: the only mutual-exclusion boundary between edit sets.
//!
//! A lease covers every target file of one edit set from apply until commit
//! or discard. Leases carry a deadline; an expired lease is force-released
//! the next time anyone asks for an overlapping file, and its holder
//! observes the revocation before committing.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::{Clock, Timestamp};
use crate::models::{AgentId, MessageId};
use crate::{AppError, Result};

struct LeaseEntry {
    id: u64,
    holder: MessageId,
    agent: AgentId,
    expires_at: Timestamp,
    revoked: Arc<AtomicBool>,
}

struct LeaseInner {
    entries: Mutex<HashMap<String, LeaseEntry>>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
    duration: Duration,
}

impl LeaseInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, LeaseEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Table of live file leases, shared by every pipeline worker.
#[derive(Clone)]
pub struct LeaseTable {
    inner: Arc<LeaseInner>,
}

impl LeaseTable {
    /// Table granting leases of `duration` measured on `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, duration: Duration) -> Self {
        Self {
            inner: Arc::new(LeaseInner {
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                clock,
                duration,
            }),
        }
    }

    /// Maximum hold time of a lease.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.inner.duration
    }

    /// Lease every path in `paths` for `holder`, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConflictingTargets` listing every path already
    /// held by a live lease.
    pub fn acquire(
        &self,
        paths: &BTreeSet<String>,
        holder: &MessageId,
        agent: &AgentId,
    ) -> Result<LeaseGuard> {
        let now = self.inner.clock.now();
        let mut entries = self.inner.lock();

        let mut conflicts = Vec::new();
        for path in paths {
            let Some(entry) = entries.get(path) else {
                continue;
            };
            if now >= entry.expires_at {
                warn!(
                    path,
                    holder = %entry.holder,
                    agent = %entry.agent,
                    "lease expired, force-releasing"
                );
                entry.revoked.store(true, Ordering::SeqCst);
                entries.remove(path);
            } else {
                conflicts.push(path.clone());
            }
        }

        if !conflicts.is_empty() {
            debug!(holder = %holder, conflicts = ?conflicts, "lease refused");
            return Err(AppError::ConflictingTargets(conflicts));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let expires_at = now.plus(self.inner.duration);
        let revoked = Arc::new(AtomicBool::new(false));
        for path in paths {
            entries.insert(
                path.clone(),
                LeaseEntry {
                    id,
                    holder: holder.clone(),
                    agent: agent.clone(),
                    expires_at,
                    revoked: Arc::clone(&revoked),
                },
            );
        }

        Ok(LeaseGuard {
            inner: Arc::clone(&self.inner),
            id,
            paths: paths.clone(),
            holder: holder.clone(),
            expires_at,
            revoked,
        })
    }

    /// Paths currently held by a lease, expired or not.
    #[must_use]
    pub fn held_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.inner.lock().keys().cloned().collect();
        paths.sort();
        paths
    }
}

/// Live lease over a set of files; released on drop.
pub struct LeaseGuard {
    inner: Arc<LeaseInner>,
    id: u64,
    paths: BTreeSet<String>,
    holder: MessageId,
    expires_at: Timestamp,
    revoked: Arc<AtomicBool>,
}

impl LeaseGuard {
    /// Files covered by this lease.
    #[must_use]
    pub fn paths(&self) -> &BTreeSet<String> {
        &self.paths
    }

    /// Deadline of this lease.
    #[must_use]
    pub fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    /// Whether the lease was force-released or has passed its deadline.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst) || self.inner.clock.now() >= self.expires_at
    }

    /// Fail if the lease is no longer valid.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LeaseExpired` once the lease is revoked.
    pub fn ensure_valid(&self) -> Result<()> {
        if self.is_revoked() {
            return Err(AppError::LeaseExpired(format!(
                "lease of {} on {} files",
                self.holder,
                self.paths.len()
            )));
        }
        Ok(())
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let mut entries = self.inner.lock();
        for path in &self.paths {
            if entries.get(path).is_some_and(|entry| entry.id == self.id) {
                entries.remove(path);
            }
        }
    }
}

//! Retention service for time-based data purge.
//!
//! Runs as a background task deleting acknowledged inbound messages,
//! outbound messages and pipeline outcomes older than `retention_days`.
//! Unacknowledged inbound messages and commit records are never purged.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::db::Database;
use super::mailbox_repo::MailboxRepo;
use super::outcome_repo::OutcomeRepo;
use crate::Result;

const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn the hourly purge task. The first pass runs immediately; a failed
/// pass is logged and retried on the next tick.
#[must_use]
pub fn spawn_retention_task(
    db: Arc<Database>,
    retention_days: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let task = async move {
        let mut ticks = tokio::time::interval(PURGE_INTERVAL);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while cancel
            .run_until_cancelled(ticks.tick())
            .await
            .is_some()
        {
            if let Err(err) = purge(&db, retention_days).await {
                warn!(%err, "retention purge failed");
            }
        }
        info!("retention task stopped");
    };
    tokio::spawn(task.instrument(info_span!("retention", retention_days)))
}

/// Run a single purge pass. Returns `(messages, outcomes)` deleted.
///
/// # Errors
///
/// Returns `AppError::Db` if either delete fails.
pub async fn purge(db: &Arc<Database>, retention_days: u32) -> Result<(u64, u64)> {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));

    let messages = MailboxRepo::new(Arc::clone(db))
        .purge_expired(cutoff)
        .await?;
    let outcomes = OutcomeRepo::new(Arc::clone(db)).purge(cutoff).await?;

    info!(retention_days, messages, outcomes, "retention purge completed");
    Ok((messages, outcomes))
}

//! Core event consumer: drains the notification channel into the audit log.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::AuditLogger;
use crate::models::{CoreEvent, EventKind};

/// Spawn a background task that records every event in `audit`.
///
/// The task runs until `cancel` fires or the channel closes; on cancel it
/// drains events already queued so shutdown does not lose them.
#[must_use]
pub fn spawn_event_consumer(
    mut rx: mpsc::Receiver<CoreEvent>,
    audit: Arc<dyn AuditLogger>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => {
                    while let Ok(event) = rx.try_recv() {
                        record(audit.as_ref(), &event);
                    }
                    info!("event consumer shutting down");
                    break;
                }
                maybe_event = rx.recv() => {
                    if let Some(e) = maybe_event { e } else {
                        info!("event channel closed");
                        break;
                    }
                }
            };
            record(audit.as_ref(), &event);
        }
    })
}

fn record(audit: &dyn AuditLogger, event: &CoreEvent) {
    match event.kind {
        EventKind::Quarantined | EventKind::Stalled => {
            warn!(agent = %event.agent, kind = ?event.kind, detail = %event.detail, "core event");
        }
        _ => info!(agent = %event.agent, kind = ?event.kind, detail = %event.detail, "core event"),
    }
    if let Err(err) = audit.log_event(event) {
        warn!(%err, "failed to write audit entry");
    }
}

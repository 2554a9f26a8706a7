//! Notification boundary: fire-and-forget core events and their JSONL sink.
//!
//! The watchdog, lifecycle manager and pipeline emit [`CoreEvent`]s through
//! a [`Notifier`]. Emission never blocks; a consumer task drains the
//! channel into an [`AuditLogger`], by default [`JsonlAuditWriter`] writing
//! daily-rotating files in `.steward/logs/`.

pub mod consumer;
pub mod writer;

use tokio::sync::mpsc;
use tracing::warn;

use crate::models::{AgentId, CoreEvent, EventKind};

/// Writes core events to a persistent store.
///
/// Implementations must be [`Send`] and [`Sync`] to allow sharing across
/// async task boundaries via [`std::sync::Arc`].
pub trait AuditLogger: Send + Sync {
    /// Record a single event.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write operation fails.
    fn log_event(&self, event: &CoreEvent) -> crate::Result<()>;
}

/// Non-blocking sender of core events.
#[derive(Clone)]
pub struct Notifier {
    tx: Option<mpsc::Sender<CoreEvent>>,
}

impl Notifier {
    /// Notifier feeding `tx`.
    #[must_use]
    pub fn new(tx: mpsc::Sender<CoreEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Notifier that drops every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emit an event. A full or closed channel drops it with a warning.
    pub fn emit(&self, kind: EventKind, agent: &AgentId, detail: impl Into<String>) {
        let Some(tx) = &self.tx else {
            return;
        };
        let event = CoreEvent::new(kind, agent.clone(), detail);
        if let Err(err) = tx.try_send(event) {
            warn!(%err, agent = %agent, ?kind, "core event dropped");
        }
    }
}

pub use consumer::spawn_event_consumer;
pub use writer::JsonlAuditWriter;

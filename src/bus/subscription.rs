//! Restartable bus subscriptions.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::Stream;
use tokio::sync::watch;
use tracing::warn;

use crate::models::{Direction, Message};

use super::BusInner;

/// Cursor-based reader over the bus message log.
///
/// Delivery is at-least-once: a consumer that persists [`cursor`](Self::cursor)
/// and resubscribes with [`MessageBus::subscribe_from`](super::MessageBus::subscribe_from)
/// sees every message from that point again. Messages of one agent are
/// always yielded in cycle order.
pub struct Subscription {
    inner: Arc<BusInner>,
    direction: Option<Direction>,
    cursor: u64,
    head_rx: watch::Receiver<u64>,
}

impl Subscription {
    pub(super) fn new(inner: Arc<BusInner>, direction: Option<Direction>, cursor: u64) -> Self {
        let head_rx = inner.head.subscribe();
        Self {
            inner,
            direction,
            cursor,
            head_rx,
        }
    }

    /// Sequence number of the next message this subscription will examine.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Next matching message if one is already available.
    pub fn try_next(&mut self) -> Option<Message> {
        let log = self.inner.lock_log();

        if self.cursor < log.base {
            warn!(
                cursor = self.cursor,
                base = log.base,
                "subscriber lagged behind retained bus log, skipping ahead"
            );
            self.cursor = log.base;
        }

        while self.cursor < log.head() {
            let index = usize::try_from(self.cursor - log.base).unwrap_or(usize::MAX);
            self.cursor += 1;
            if let Some(message) = log.entries.get(index) {
                if self.direction.is_none_or(|d| d == message.direction) {
                    return Some(message.clone());
                }
            }
        }

        None
    }

    /// Wait for the next matching message. Returns `None` once the bus is
    /// closed and every retained message has been consumed.
    pub async fn next(&mut self) -> Option<Message> {
        loop {
            if let Some(message) = self.try_next() {
                return Some(message);
            }
            if self.inner.closed.load(Ordering::SeqCst) {
                return None;
            }
            if self.head_rx.changed().await.is_err() {
                return self.try_next();
            }
        }
    }

    /// Convert into a lazy [`Stream`] of messages.
    pub fn into_stream(self) -> impl Stream<Item = Message> + Send {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|message| (message, sub))
        })
    }
}

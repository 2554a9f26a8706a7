//! Message bus: routes messages between agents, the response pipeline and
//! the watchdog, and maintains the per-agent activity ledger.
//!
//! Every [`publish`](MessageBus::publish) is durably appended to the
//! [`MailboxStore`] before it becomes visible to subscribers, then updates
//! the publishing agent's [`ActivityRecord`]. Publishes for one agent are
//! serialized so cycle numbers and log order agree; different agents never
//! wait on each other.

pub mod ledger;
pub mod mailbox;
pub mod subscription;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::{Clock, Timestamp};
use crate::models::{ActivityRecord, AgentId, AgentState, Direction, Message, MessageId, Payload};
use crate::{AppError, Result};

pub use ledger::ActivityLedger;
pub use mailbox::MailboxStore;
pub use subscription::Subscription;

/// Tunables for a [`MessageBus`].
#[derive(Debug, Clone, Copy)]
pub struct BusSettings {
    /// Maximum payload size in bytes.
    pub max_payload_bytes: usize,
    /// Messages retained in memory for subscriber replay.
    pub log_capacity: usize,
}

/// Bounded in-memory message log addressed by global sequence number.
pub(crate) struct MessageLog {
    pub(crate) base: u64,
    pub(crate) entries: VecDeque<Message>,
    capacity: usize,
}

impl MessageLog {
    pub(crate) fn head(&self) -> u64 {
        self.base + self.entries.len() as u64
    }

    fn push(&mut self, message: Message) -> u64 {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.base += 1;
        }
        self.entries.push_back(message);
        self.head()
    }
}

pub(crate) struct BusInner {
    ledger: ActivityLedger,
    store: Arc<dyn MailboxStore>,
    clock: Arc<dyn Clock>,
    settings: BusSettings,
    publish_locks: HashMap<AgentId, tokio::sync::Mutex<()>>,
    log: Mutex<MessageLog>,
    pub(crate) head: watch::Sender<u64>,
    pub(crate) closed: AtomicBool,
}

impl BusInner {
    pub(crate) fn lock_log(&self) -> MutexGuard<'_, MessageLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cheaply clonable handle to the shared bus.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Open a bus for the fixed pool `agents`.
    ///
    /// Each agent's `last_cycle` is recovered from the store so cycle
    /// numbers keep increasing across process restarts. Liveness timers
    /// start fresh at the current clock reading. The store's backlog of
    /// unhandled outbound messages is placed in the log ahead of anything
    /// published later, so new subscribers see it first.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the latest message or the backlog
    /// cannot be read.
    pub async fn open(
        agents: &[AgentId],
        store: Arc<dyn MailboxStore>,
        clock: Arc<dyn Clock>,
        settings: BusSettings,
    ) -> Result<Self> {
        let mut cycles = BTreeMap::new();
        for agent in agents {
            if let Some(latest) = store.read_latest(agent).await? {
                cycles.insert(agent.clone(), latest.cycle);
            }
        }

        let backlog: Vec<Message> = store
            .read_backlog()
            .await?
            .into_iter()
            .filter(|message| agents.contains(&message.agent))
            .collect();
        if backlog.len() > settings.log_capacity {
            warn!(
                backlog = backlog.len(),
                capacity = settings.log_capacity,
                "unhandled backlog exceeds bus log capacity"
            );
        }
        let mut log = MessageLog {
            base: 0,
            entries: VecDeque::new(),
            capacity: settings.log_capacity.max(1),
        };
        for message in backlog {
            log.push(message);
        }
        if !log.entries.is_empty() {
            info!(messages = log.entries.len(), "replaying unhandled outbound messages");
        }

        let now = clock.now();
        let (head, _) = watch::channel(log.head());
        let inner = BusInner {
            ledger: ActivityLedger::new(agents, now, &cycles),
            store,
            clock,
            settings,
            publish_locks: agents
                .iter()
                .map(|a| (a.clone(), tokio::sync::Mutex::new(())))
                .collect(),
            log: Mutex::new(log),
            head,
            closed: AtomicBool::new(false),
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Publish a message for `agent`.
    ///
    /// # Errors
    ///
    /// - `AppError::UnknownAgent` if `agent` is not in the pool.
    /// - `AppError::PayloadTooLarge` if the payload exceeds the byte budget.
    /// - The store's error if the durable append fails; nothing is published then.
    pub async fn publish(
        &self,
        agent: &AgentId,
        direction: Direction,
        payload: Payload,
    ) -> Result<Message> {
        self.publish_message(agent, direction, payload, None).await
    }

    /// Publish an outbound response that answers inbound message `reply_to`,
    /// acknowledging it in the mailbox.
    ///
    /// # Errors
    ///
    /// Same as [`publish`](Self::publish).
    pub async fn publish_reply(
        &self,
        agent: &AgentId,
        payload: Payload,
        reply_to: MessageId,
    ) -> Result<Message> {
        self.publish_message(agent, Direction::Outbound, payload, Some(reply_to))
            .await
    }

    async fn publish_message(
        &self,
        agent: &AgentId,
        direction: Direction,
        payload: Payload,
        reply_to: Option<MessageId>,
    ) -> Result<Message> {
        let inner = &self.inner;
        let agent_lock = inner
            .publish_locks
            .get(agent)
            .ok_or_else(|| AppError::UnknownAgent(agent.to_string()))?;

        let size = payload.byte_len();
        if size > inner.settings.max_payload_bytes {
            return Err(AppError::PayloadTooLarge {
                size,
                limit: inner.settings.max_payload_bytes,
            });
        }

        let _serial = agent_lock.lock().await;

        let current = inner.ledger.get(agent)?;
        let message = Message {
            id: MessageId::generate(),
            agent: agent.clone(),
            direction,
            payload,
            timestamp: inner.clock.now().max(current.last_seen),
            cycle: current.last_cycle + 1,
            reply_to,
            created_at: Utc::now(),
        };

        inner.store.append(agent, &message).await?;

        inner.ledger.update(agent, |record| observe(record, &message))?;

        let head = inner.lock_log().push(message.clone());
        inner.head.send_replace(head);

        if let Some(ref answered) = message.reply_to {
            if let Err(err) = inner.store.acknowledge(answered).await {
                warn!(%err, agent = %agent, message_id = %answered, "failed to acknowledge answered message");
            }
        }

        debug!(
            agent = %agent,
            message_id = %message.id,
            direction = direction.as_str(),
            cycle = message.cycle,
            "message published"
        );
        Ok(message)
    }

    /// Activity record of `agent`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownAgent` if `agent` is not in the pool.
    pub fn activity(&self, agent: &AgentId) -> Result<ActivityRecord> {
        self.inner.ledger.get(agent)
    }

    /// Snapshot of every agent's activity record, in id order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ActivityRecord> {
        self.inner.ledger.snapshot()
    }

    /// The fixed agent pool in id order.
    #[must_use]
    pub fn agents(&self) -> Vec<AgentId> {
        self.inner.ledger.agents()
    }

    /// Subscribe to messages of `direction`, starting from the oldest retained message.
    #[must_use]
    pub fn subscribe(&self, direction: Direction) -> Subscription {
        let base = self.inner.lock_log().base;
        Subscription::new(Arc::clone(&self.inner), Some(direction), base)
    }

    /// Resume a subscription at a previously saved cursor.
    #[must_use]
    pub fn subscribe_from(&self, direction: Direction, cursor: u64) -> Subscription {
        Subscription::new(Arc::clone(&self.inner), Some(direction), cursor)
    }

    /// Subscribe to messages in both directions.
    #[must_use]
    pub fn subscribe_all(&self) -> Subscription {
        let base = self.inner.lock_log().base;
        Subscription::new(Arc::clone(&self.inner), None, base)
    }

    /// Inbound messages of `agent` not yet acknowledged, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownAgent` or the store's error.
    pub async fn unacknowledged(&self, agent: &AgentId) -> Result<Vec<Message>> {
        if !self.inner.ledger.contains(agent) {
            return Err(AppError::UnknownAgent(agent.to_string()));
        }
        self.inner.store.list_unacknowledged(agent).await
    }

    /// Acknowledge an inbound message.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn acknowledge(&self, id: &MessageId) -> Result<()> {
        self.inner.store.acknowledge(id).await
    }

    /// Current monotonic time on the bus clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.inner.clock.now()
    }

    /// Stop all subscriptions once they drain the retained log.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.head.send_modify(|_| {});
    }

    pub(crate) fn ledger(&self) -> &ActivityLedger {
        &self.inner.ledger
    }
}

/// Fold a freshly published message into its agent's record.
fn observe(record: &mut ActivityRecord, message: &Message) {
    record.last_seen = record.last_seen.max(message.timestamp);
    record.last_cycle = message.cycle;

    if message.direction != Direction::Outbound {
        return;
    }

    record.last_outbound = record.last_outbound.max(message.timestamp);
    match record.state {
        AgentState::Idle | AgentState::Stalled => record.state = AgentState::Active,
        AgentState::Restarting => {
            if record.restarted_at.is_some_and(|at| message.timestamp >= at) {
                record.state = AgentState::Active;
            }
        }
        AgentState::Active | AgentState::Quarantined => {}
    }
}

//! Mailbox store boundary.
//!
//! The bus owns the canonical copy of every message; a [`MailboxStore`]
//! holds the durable replica. Stores must make an appended message fully
//! visible or not at all.

use futures_util::future::BoxFuture;

use crate::models::{AgentId, Message, MessageId};
use crate::Result;

/// Durable per-agent message storage.
pub trait MailboxStore: Send + Sync {
    /// Most recent message (highest cycle) recorded for `agent`, in either direction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn read_latest<'a>(&'a self, agent: &'a AgentId) -> BoxFuture<'a, Result<Option<Message>>>;

    /// Append `message` to the mailbox of `agent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write is not durably recorded.
    fn append<'a>(&'a self, agent: &'a AgentId, message: &'a Message) -> BoxFuture<'a, Result<()>>;

    /// Inbound messages of `agent` not yet acknowledged, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn list_unacknowledged<'a>(&'a self, agent: &'a AgentId)
        -> BoxFuture<'a, Result<Vec<Message>>>;

    /// Mark an inbound message as handled by its agent. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn acknowledge<'a>(&'a self, id: &'a MessageId) -> BoxFuture<'a, Result<()>>;

    /// Outbound messages whose handling was never recorded, in cycle order
    /// per agent. Replayed to subscribers when a bus opens.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn read_backlog(&self) -> BoxFuture<'_, Result<Vec<Message>>>;
}

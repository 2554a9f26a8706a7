//! Agent execution contexts.
//!
//! The lifecycle manager only needs to deliver inbound messages to an
//! agent and to tear its context down and bring it back. [`ProcessRuntime`]
//! runs each agent as a child process; [`DetachedRuntime`] is used when
//! agents run elsewhere and read their mailboxes on their own.

pub mod codec;
pub mod process;

use futures_util::future::BoxFuture;

use crate::models::{AgentId, Message};
use crate::Result;

pub use process::{ProcessRuntime, SpawnConfig};

/// Execution contexts of the agent pool.
pub trait AgentRuntime: Send + Sync {
    /// Hand an inbound message to the agent's current context.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Runtime` if the context is not running or the
    /// write fails. The message stays unacknowledged in the mailbox.
    fn deliver<'a>(&'a self, agent: &'a AgentId, message: &'a Message)
        -> BoxFuture<'a, Result<()>>;

    /// Stop the agent's context. Stopping a context that is not running succeeds.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Runtime` if the context cannot be stopped.
    fn teardown<'a>(&'a self, agent: &'a AgentId) -> BoxFuture<'a, Result<()>>;

    /// Start a fresh context for the agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Runtime` if the context cannot be started.
    fn initialize<'a>(&'a self, agent: &'a AgentId) -> BoxFuture<'a, Result<()>>;
}

/// Runtime for externally managed agents: delivery leaves messages in the
/// mailbox and restarts only reset the bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedRuntime;

impl AgentRuntime for DetachedRuntime {
    fn deliver<'a>(
        &'a self,
        agent: &'a AgentId,
        message: &'a Message,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            tracing::debug!(agent = %agent, message_id = %message.id, "message left in mailbox for detached agent");
            Ok(())
        })
    }

    fn teardown<'a>(&'a self, _agent: &'a AgentId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn initialize<'a>(&'a self, _agent: &'a AgentId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

//! Bus message model.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::AgentId;
use crate::clock::Timestamp;

/// Unique message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a new random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("msg:{}", Uuid::new_v4()))
    }

    /// Wrap an existing identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message flow direction relative to the agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Task or directive delivered to the agent.
    Inbound,
    /// Response produced by the agent.
    Outbound,
}

impl Direction {
    /// Database representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Control directive issued by the watchdog.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    /// Prompt the agent to continue its current task.
    Resume,
    /// Tear down and reinitialize the agent's execution context.
    Restart,
}

/// Message body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Payload {
    /// Free-form task text or agent response.
    Text(String),
    /// Synthetic control message.
    Directive(Directive),
}

impl Payload {
    /// Size counted against the payload byte budget.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Directive(_) => 0,
        }
    }

    /// Text body, if this is a text payload.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Directive(_) => None,
        }
    }

    /// Directive, if this is a control payload.
    #[must_use]
    pub fn as_directive(&self) -> Option<Directive> {
        match self {
            Self::Directive(directive) => Some(*directive),
            Self::Text(_) => None,
        }
    }
}

/// Immutable bus message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique identifier.
    pub id: MessageId,
    /// Agent the message belongs to.
    pub agent: AgentId,
    /// Flow direction.
    pub direction: Direction,
    /// Message body.
    pub payload: Payload,
    /// Monotonic publish timestamp.
    pub timestamp: Timestamp,
    /// Per-agent sequence number, strictly increasing.
    pub cycle: u64,
    /// Inbound message this outbound message answers.
    pub reply_to: Option<MessageId>,
    /// Wall-clock creation time, informational only.
    pub created_at: DateTime<Utc>,
}

//! Change descriptors and their materialized edit sets.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use super::agent::AgentId;
use super::message::MessageId;

/// Opaque repository revision identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Wrap a revision string.
    #[must_use]
    pub fn new(rev: impl Into<String>) -> Self {
        Self(rev.into())
    }

    /// Borrow the revision string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Revision {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of structural edit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    /// Insert content after the location.
    Insert,
    /// Replace the located region.
    Replace,
    /// Remove the located region.
    Delete,
}

/// Semantic location inside a file; never a line number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "at", rename_all = "snake_case")]
pub enum Location {
    /// Beginning of the file.
    Start,
    /// End of the file.
    End,
    /// A top-level item (`fn`, `struct`, `enum`, `trait`, `impl`, `mod`, ...) by name.
    Symbol {
        /// Item name.
        name: String,
    },
    /// A verbatim snippet that must occur exactly once.
    Anchor {
        /// Snippet text.
        text: String,
    },
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::End => f.write_str("end"),
            Self::Symbol { name } => write!(f, "symbol `{name}`"),
            Self::Anchor { text } => {
                let preview: String = text.chars().take(40).collect();
                write!(f, "anchor `{preview}`")
            }
        }
    }
}

/// One ordered operation of a descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditOperation {
    /// Workspace-relative target path; must be listed in `target_files`.
    pub path: String,
    /// Operation kind.
    pub kind: EditKind,
    /// Where the operation applies.
    pub location: Location,
    /// New content for `insert` and `replace`.
    #[serde(default)]
    pub content: Option<String>,
}

/// Structured change intent extracted from an agent response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeDescriptor {
    /// Every file the operations touch.
    pub target_files: BTreeSet<String>,
    /// Operations, applied in order.
    pub operations: Vec<EditOperation>,
    /// Message the descriptor was extracted from.
    pub origin_message: MessageId,
    /// Agent that produced the message.
    pub agent: AgentId,
    /// Optional one-line summary used as the commit message.
    pub summary: Option<String>,
}

/// Concrete file contents derived from a descriptor at a base revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditSet {
    /// Target path to full new content.
    pub files: BTreeMap<String, String>,
    /// Revision the contents were derived from.
    pub base_revision: Revision,
    /// SHA-256 of each target's content at derivation time; `None` if the file did not exist.
    pub base_fingerprints: BTreeMap<String, Option<String>>,
    /// Message the descriptor came from.
    pub origin_message: MessageId,
    /// Agent that produced the change.
    pub agent: AgentId,
    /// Commit message summary.
    pub summary: String,
}

impl EditSet {
    /// Target paths of this edit set.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

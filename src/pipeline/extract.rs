//! Classification of agent responses.
//!
//! A response carries a change only when it contains a fenced block opened
//! with ```` ```change ````, whose body is a JSON descriptor:
//!
//! ````text
//! ```change
//! {"target_files": ["src/lib.rs"],
//!  "summary": "add helper",
//!  "operations": [{"path": "src/lib.rs", "kind": "insert",
//!                  "location": {"at": "end"}, "content": "fn helper() {}\n"}]}
//! ```
//! ````
//!
//! Classification is pure string inspection; it never touches the file system.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::models::{ChangeDescriptor, EditOperation, Message, Payload};

/// Marker opening a change block.
pub const FENCE_OPEN: &str = "```change";
const FENCE_CLOSE: &str = "```";

/// Shape of an agent response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePayload {
    /// Plain conversational output; nothing to apply.
    ConversationalText,
    /// A well-formed change descriptor.
    ChangeDescriptor(ChangeDescriptor),
    /// A change marker was present but the block could not be parsed.
    Unrecognized(String),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorBody {
    target_files: BTreeSet<String>,
    operations: Vec<EditOperation>,
    #[serde(default)]
    summary: Option<String>,
}

/// Classify an outbound message.
#[must_use]
pub fn classify(message: &Message) -> ResponsePayload {
    let text = match &message.payload {
        Payload::Text(text) => text,
        Payload::Directive(_) => return ResponsePayload::ConversationalText,
    };

    let body = match fenced_body(text) {
        Ok(Some(body)) => body,
        Ok(None) => return ResponsePayload::ConversationalText,
        Err(reason) => return ResponsePayload::Unrecognized(reason),
    };

    match serde_json::from_str::<DescriptorBody>(body) {
        Ok(parsed) => ResponsePayload::ChangeDescriptor(ChangeDescriptor {
            target_files: parsed.target_files,
            operations: parsed.operations,
            origin_message: message.id.clone(),
            agent: message.agent.clone(),
            summary: parsed.summary.filter(|s| !s.trim().is_empty()),
        }),
        Err(err) => ResponsePayload::Unrecognized(format!("invalid change block: {err}")),
    }
}

/// Body of the single ```` ```change ```` block, if any.
fn fenced_body(text: &str) -> Result<Option<&str>, String> {
    let Some(open) = find_fence(text, 0) else {
        return Ok(None);
    };

    let after_marker = open + FENCE_OPEN.len();
    let body_start = match text[after_marker..].find('\n') {
        Some(offset) => after_marker + offset + 1,
        None => return Err("change block is not terminated".into()),
    };

    let close = text[body_start..]
        .match_indices(FENCE_CLOSE)
        .map(|(offset, _)| body_start + offset)
        .find(|&idx| idx == 0 || text.as_bytes()[idx - 1] == b'\n')
        .ok_or_else(|| "change block is not terminated".to_owned())?;

    if find_fence(text, close + FENCE_CLOSE.len()).is_some() {
        return Err("response contains more than one change block".into());
    }

    Ok(Some(&text[body_start..close]))
}

/// Position of a ```` ```change ```` marker at the start of a line, from `from` on.
fn find_fence(text: &str, from: usize) -> Option<usize> {
    text[from..]
        .match_indices(FENCE_OPEN)
        .map(|(offset, _)| from + offset)
        .find(|&idx| {
            let line_start = idx == 0 || text.as_bytes()[idx - 1] == b'\n';
            let rest = &text[idx + FENCE_OPEN.len()..];
            let marker_ends = rest.is_empty() || rest.starts_with(['\n', '\r', ' ']);
            line_start && marker_ends
        })
}

use serde::{Deserialize, Serialize};

use super::response::{FinishReason, Usage};

/// Category of a mid-stream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The backend stream failed or returned an error payload
    Upstream,
    /// The transport signalled a timeout; handled identically to an
    /// upstream failure
    Timeout,
}

/// Canonical incremental event
///
/// Protocol stream decoders produce these; the streaming transformer
/// consumes them. For any tool call id the required ordering is
/// `ToolCallStart` → zero or more `ToolCallArgsDelta` → `ToolCallArgsDone`,
/// with every `ToolCallArgsDone` preceding `Completion`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalEvent {
    /// The assistant turn has begun
    RoleStart,
    /// Incremental text content
    ContentDelta {
        /// Text fragment
        text: String,
    },
    /// A tool call has opened
    ToolCallStart {
        /// Unique call id
        id: String,
        /// Function name
        name: String,
    },
    /// Incremental tool-call argument data
    ToolCallArgsDelta {
        /// Call id this fragment belongs to
        id: String,
        /// Raw argument fragment
        fragment: String,
    },
    /// A tool call's arguments are complete
    ToolCallArgsDone {
        /// Call id being closed
        id: String,
    },
    /// The turn has finished
    Completion {
        /// Why generation stopped
        finish_reason: FinishReason,
        /// Final token usage, when the backend reported it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    /// The stream failed
    Error {
        /// Failure category
        kind: ErrorKind,
        /// Human-readable detail
        message: String,
    },
}

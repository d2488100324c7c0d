//! Responses protocol wire format types
//!
//! Covers the subset of the responses grammar this proxy translates:
//! role messages, function calls, and function call outputs. Other output
//! item kinds are tolerated on decode and passed over.

use serde::{Deserialize, Serialize};

// -- Request types --

/// Responses protocol request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    /// Model identifier
    pub model: String,
    /// Input: a bare string or a list of input items
    pub input: ResponsesInput,
    /// System-level instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Whether to stream the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Tool declarations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ResponsesToolDecl>>,
    /// Tool choice configuration (string mode or function object)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
}

/// Request input: shorthand string or item list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInput {
    /// Single user message shorthand
    Text(String),
    /// Ordered input items
    Items(Vec<ResponsesInputItem>),
}

/// Input item within a responses-protocol request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesInputItem {
    /// A prior assistant function call being replayed into context
    FunctionCall {
        /// Call identifier correlating with its output
        call_id: String,
        /// Function name
        name: String,
        /// JSON-encoded arguments
        arguments: String,
        /// Item identifier
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Result of a prior function call
    FunctionCallOutput {
        /// Call identifier this output responds to
        call_id: String,
        /// Tool output
        output: String,
    },
    /// Role-keyed message (system, user, or assistant); not type-tagged
    /// on the wire
    #[serde(untagged)]
    Message(ResponsesRoleMessage),
}

/// Role-keyed message item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRoleMessage {
    /// Role: "system", "developer", "user", or "assistant"
    pub role: String,
    /// Content: string shorthand or typed text parts
    pub content: ResponsesMessageContent,
}

/// Message content within an input item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesMessageContent {
    /// Plain text
    Text(String),
    /// Typed content parts
    Parts(Vec<ResponsesContentPart>),
}

impl ResponsesMessageContent {
    /// Extract text content, joining text parts and skipping the rest
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ResponsesContentPart::Text { text } => Some(text.as_str()),
                    ResponsesContentPart::Other(_) => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// Typed content part (`input_text` / `output_text`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesContentPart {
    /// Text part of either direction
    Text {
        /// The text string
        text: String,
    },
    /// Any other part type, tolerated and ignored
    Other(serde_json::Value),
}

/// Tool declaration: natively flat, chat-style wrapper tolerated
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesToolDecl {
    /// `{type: "function", function: {...}}` (chat-style wrapper)
    Wrapped {
        /// Tool type
        #[serde(rename = "type")]
        tool_type: String,
        /// Function specification
        function: ResponsesFunctionDecl,
    },
    /// `{type: "function", name, parameters}` (native flat shape)
    Flat(ResponsesFunctionDecl),
}

/// Function specification within a tool declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesFunctionDecl {
    /// Tool type (always "function")
    #[serde(rename = "type", default = "function_tool_type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for parameters
    #[serde(default, alias = "input_schema", skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

fn function_tool_type() -> String {
    "function".to_owned()
}

// -- Response types --

/// Responses protocol response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesResponse {
    /// Response identifier
    pub id: String,
    /// Object type (always "response")
    pub object: String,
    /// Creation timestamp
    pub created_at: u64,
    /// Terminal status ("completed", "incomplete", "failed")
    pub status: String,
    /// Model used
    pub model: String,
    /// Output items
    pub output: Vec<ResponsesOutputItem>,
    /// Token usage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponsesUsage>,
}

/// Output item within a response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesOutputItem {
    /// Assistant message with text parts
    Message {
        /// Item identifier
        id: String,
        /// Role (always "assistant")
        role: String,
        /// Text parts
        content: Vec<ResponsesOutputText>,
    },
    /// Function call requested by the model
    FunctionCall {
        /// Item identifier
        id: String,
        /// Call identifier correlating with a later output
        call_id: String,
        /// Function name
        name: String,
        /// JSON-encoded arguments
        arguments: String,
        /// Item status
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
}

/// Text part within an output message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesOutputText {
    /// Part type (always "output_text")
    #[serde(rename = "type")]
    pub part_type: String,
    /// The text string
    pub text: String,
}

/// Token usage
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResponsesUsage {
    /// Input tokens
    pub input_tokens: u32,
    /// Output tokens
    pub output_tokens: u32,
    /// Total tokens
    pub total_tokens: u32,
}

// -- Streaming types --

/// Responses protocol SSE event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponsesStreamEvent {
    /// Stream started
    #[serde(rename = "response.created")]
    Created {
        /// Partial response with metadata
        response: ResponsesResponse,
    },
    /// A new output item appeared
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        /// Position in the output list
        output_index: u32,
        /// The new item
        item: ResponsesOutputItem,
    },
    /// Incremental message text
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        /// Item the text belongs to
        item_id: String,
        /// Position in the output list
        output_index: u32,
        /// Text fragment
        delta: String,
    },
    /// Incremental function call arguments
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        /// Item the arguments belong to
        item_id: String,
        /// Position in the output list
        output_index: u32,
        /// Argument fragment
        delta: String,
    },
    /// Function call arguments are complete
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        /// Item the arguments belong to
        item_id: String,
        /// Position in the output list
        output_index: u32,
        /// Full argument string
        arguments: String,
    },
    /// An output item finished
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        /// Position in the output list
        output_index: u32,
        /// The finished item
        item: ResponsesOutputItem,
    },
    /// Stream completed
    #[serde(rename = "response.completed")]
    Completed {
        /// Final response with full output
        response: ResponsesResponse,
    },
    /// Mid-stream error
    #[serde(rename = "error")]
    Error {
        /// Error code
        code: String,
        /// Error message
        message: String,
    },
    /// Any other event type, tolerated and ignored
    #[serde(other)]
    Unknown,
}

impl ResponsesStreamEvent {
    /// The SSE event name for this event
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "response.created",
            Self::OutputItemAdded { .. } => "response.output_item.added",
            Self::OutputTextDelta { .. } => "response.output_text.delta",
            Self::FunctionCallArgumentsDelta { .. } => "response.function_call_arguments.delta",
            Self::FunctionCallArgumentsDone { .. } => "response.function_call_arguments.done",
            Self::OutputItemDone { .. } => "response.output_item.done",
            Self::Completed { .. } => "response.completed",
            Self::Error { .. } | Self::Unknown => "error",
        }
    }
}

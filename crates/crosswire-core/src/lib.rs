//! Canonical data model for the crosswire engine
//!
//! Every supported wire protocol is translated into and out of the types
//! defined here. The model is deliberately small: one message shape, one
//! tool-call shape, one incremental event union. Two invariants hold
//! everywhere outside the codec boundary:
//!
//! - a message with tool calls has `content == None` and its completion
//!   finishes with [`FinishReason::ToolCalls`];
//! - a tool call's `arguments` string always parses as JSON.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod registry;
pub mod types;

pub use registry::{RegistryHandle, SchemaRegistry, ToolSchema};
pub use types::{
    CanonicalEvent, Choice, CompletionParams, CompletionRequest, CompletionResponse, ErrorKind, FinishReason,
    FunctionCall, FunctionDefinition, Message, Role, ToolCall, ToolChoice, ToolChoiceFunction, ToolChoiceMode,
    ToolDefinition, Usage,
};

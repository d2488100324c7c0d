//! Protocol transformer dispatch

use std::time::{SystemTime, UNIX_EPOCH};

use crosswire_core::CanonicalEvent;

use crate::error::StreamError;
use crate::protocol::Protocol;

use super::SseFrame;
use super::chat::ChatTransformer;
use super::messages::MessagesTransformer;
use super::responses::ResponsesTransformer;

/// Per-stream identity and options shared by all protocol transformers
#[derive(Debug, Clone)]
pub struct StreamContext {
    /// Response identifier surfaced to the client
    pub response_id: String,
    /// Model name surfaced to the client
    pub model: String,
    /// Creation timestamp (unix seconds)
    pub created: u64,
    /// Buffer argument deltas and flush them once per call
    pub coalesce_tool_args: bool,
}

impl StreamContext {
    /// Build a context with a fresh response id and the current time
    pub fn new(model: impl Into<String>) -> Self {
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            response_id: format!("resp_{}", uuid::Uuid::new_v4().simple()),
            model: model.into(),
            created,
            coalesce_tool_args: false,
        }
    }

    /// Enable or disable argument coalescing
    pub fn with_coalescing(mut self, coalesce: bool) -> Self {
        self.coalesce_tool_args = coalesce;
        self
    }

    /// Build a context from the streaming configuration
    pub fn from_config(model: impl Into<String>, config: &crosswire_config::StreamConfig) -> Self {
        Self::new(model).with_coalescing(config.coalesce_tool_args)
    }
}

/// State machine translating canonical events into one protocol's frames
///
/// Exactly three variants exist, selected once per stream by protocol
/// tag. A [`StreamError`] from [`Self::push`] is fatal: the machine is
/// closed, and [`Self::fail`] yields the native error frame the client
/// must receive before the connection drops.
#[derive(Debug)]
pub enum StreamTransformer {
    /// Chat-completions output
    Chat(ChatTransformer),
    /// Messages output
    Messages(MessagesTransformer),
    /// Responses output
    Responses(ResponsesTransformer),
}

impl StreamTransformer {
    /// Create the transformer for a protocol
    pub fn new(protocol: Protocol, context: StreamContext) -> Self {
        match protocol {
            Protocol::ChatCompletions => Self::Chat(ChatTransformer::new(context)),
            Protocol::Messages => Self::Messages(MessagesTransformer::new(context)),
            Protocol::Responses => Self::Responses(ResponsesTransformer::new(context)),
        }
    }

    /// Translate one canonical event into native frames
    ///
    /// Canonical `Error` events produce the native error framing and
    /// close the stream. Ordering violations close the stream and return
    /// an error; use [`Self::fail`] to obtain the error frame owed to the
    /// client.
    pub fn push(&mut self, event: CanonicalEvent) -> Result<Vec<SseFrame>, StreamError> {
        match self {
            Self::Chat(t) => t.push(event),
            Self::Messages(t) => t.push(event),
            Self::Responses(t) => t.push(event),
        }
    }

    /// Emit native error framing and close the stream
    ///
    /// Idempotent: once the error frame has been produced, further calls
    /// return nothing. Transport timeouts are reported here exactly like
    /// upstream errors.
    pub fn fail(&mut self, message: &str) -> Vec<SseFrame> {
        match self {
            Self::Chat(t) => t.fail(message),
            Self::Messages(t) => t.fail(message),
            Self::Responses(t) => t.fail(message),
        }
    }

    /// Whether the stream reached a terminal state
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Chat(t) => t.is_closed(),
            Self::Messages(t) => t.is_closed(),
            Self::Responses(t) => t.is_closed(),
        }
    }
}

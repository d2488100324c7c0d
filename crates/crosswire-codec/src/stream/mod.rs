//! Streaming transformation
//!
//! Canonical events in, native protocol SSE frames out. One
//! [`StreamTransformer`] exists per in-flight response; the
//! [`channel`] module bridges independently-paced producer and consumer
//! tasks over a bounded, cancellable channel.

pub mod channel;
pub mod decoder;
mod chat;
mod messages;
mod responses;
mod state;
mod transformer;

pub use channel::spawn_pump;
pub use decoder::StreamDecoder;
pub use transformer::{StreamContext, StreamTransformer};

/// One serialized server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// SSE event name; `None` for data-only frames
    pub event: Option<&'static str>,
    /// Serialized payload
    pub data: String,
}

impl SseFrame {
    /// A data-only frame
    pub fn data_only(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    /// A named event frame
    pub fn named(event: &'static str, data: impl Into<String>) -> Self {
        Self {
            event: Some(event),
            data: data.into(),
        }
    }

    /// Render as wire text
    pub fn render(&self) -> String {
        match self.event {
            Some(event) => format!("event: {event}\ndata: {}\n\n", self.data),
            None => format!("data: {}\n\n", self.data),
        }
    }
}

//! Backend stream decoding dispatch
//!
//! Wraps the per-protocol stream decoders behind one enum so the
//! transport layer can feed raw SSE payloads without knowing which
//! grammar the backend speaks.

use crosswire_core::CanonicalEvent;

use crate::convert::chat::ChatStreamDecoder;
use crate::convert::messages::MessagesStreamDecoder;
use crate::convert::responses::ResponsesStreamDecoder;
use crate::protocol::Protocol;
use crate::protocol::chat::ChatStreamChunk;
use crate::protocol::messages::MessagesStreamEvent;
use crate::protocol::responses::ResponsesStreamEvent;

/// Stateful decoder turning one backend's native stream into canonical
/// events
#[derive(Debug)]
pub enum StreamDecoder {
    /// Chat-completions chunks
    Chat(ChatStreamDecoder),
    /// Messages events
    Messages(MessagesStreamDecoder),
    /// Responses events
    Responses(ResponsesStreamDecoder),
}

impl StreamDecoder {
    /// Create the decoder for a protocol
    pub fn new(protocol: Protocol) -> Self {
        match protocol {
            Protocol::ChatCompletions => Self::Chat(ChatStreamDecoder::new()),
            Protocol::Messages => Self::Messages(MessagesStreamDecoder::new()),
            Protocol::Responses => Self::Responses(ResponsesStreamDecoder::new()),
        }
    }

    /// Decode one raw SSE data payload
    ///
    /// The chat grammar's `[DONE]` sentinel flushes the terminal events.
    /// Unparsable payloads are skipped with a debug log rather than
    /// failing the stream; backends interleave comments and vendor
    /// extensions freely.
    pub fn decode_data(&mut self, data: &str) -> Vec<CanonicalEvent> {
        let data = data.trim();
        if data.is_empty() {
            return Vec::new();
        }

        if data == "[DONE]" {
            return self.finish();
        }

        match self {
            Self::Chat(decoder) => match serde_json::from_str::<ChatStreamChunk>(data) {
                Ok(chunk) => decoder.decode_chunk(&chunk),
                Err(e) => skip(data, &e),
            },
            Self::Messages(decoder) => match serde_json::from_str::<MessagesStreamEvent>(data) {
                Ok(event) => decoder.decode_event(&event),
                Err(e) => skip(data, &e),
            },
            Self::Responses(decoder) => match serde_json::from_str::<ResponsesStreamEvent>(data) {
                Ok(event) => decoder.decode_event(&event),
                Err(e) => skip(data, &e),
            },
        }
    }

    /// Flush terminal events at the natural end of the backend stream
    pub fn finish(&mut self) -> Vec<CanonicalEvent> {
        match self {
            Self::Chat(decoder) => decoder.finish(),
            Self::Messages(decoder) => decoder.finish(),
            Self::Responses(decoder) => decoder.finish(),
        }
    }

    /// Map a transport failure (including a timeout) to a canonical
    /// error event
    pub fn fail(&mut self, message: impl Into<String>) -> Vec<CanonicalEvent> {
        match self {
            Self::Chat(decoder) => decoder.fail(message),
            Self::Messages(decoder) => decoder.fail(message),
            Self::Responses(decoder) => decoder.fail(message),
        }
    }
}

fn skip(data: &str, error: &serde_json::Error) -> Vec<CanonicalEvent> {
    tracing::debug!(error = %error, data, "skipping unparseable stream payload");
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_sentinel_flushes_completion() {
        let mut decoder = StreamDecoder::new(Protocol::ChatCompletions);
        let events = decoder.decode_data("[DONE]");
        assert!(matches!(events.last(), Some(CanonicalEvent::Completion { .. })));
    }

    #[test]
    fn junk_payloads_are_skipped() {
        let mut decoder = StreamDecoder::new(Protocol::Messages);
        assert!(decoder.decode_data("not json").is_empty());
        assert!(decoder.decode_data("").is_empty());
    }

    #[test]
    fn transport_failure_becomes_an_error_event() {
        let mut decoder = StreamDecoder::new(Protocol::Responses);
        let events = decoder.fail("connection reset");
        assert!(matches!(events.as_slice(), [CanonicalEvent::Error { .. }]));
        // A later natural finish produces nothing further.
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn chat_content_chunk_decodes() {
        let mut decoder = StreamDecoder::new(Protocol::ChatCompletions);
        let events = decoder.decode_data(
            r#"{"id":"c","object":"chat.completion.chunk","created":1,"model":"m","choices":[{"index":0,"delta":{"role":"assistant","content":"hi"},"finish_reason":null}]}"#,
        );
        assert_eq!(
            events,
            vec![
                CanonicalEvent::RoleStart,
                CanonicalEvent::ContentDelta { text: "hi".to_owned() },
            ]
        );
    }
}

//! Native wire format types for the supported protocols
//!
//! Each submodule declares the full serde shape of one protocol's
//! requests, responses, and stream events. Nothing here transforms;
//! conversion lives in [`crate::convert`].

pub mod chat;
pub mod messages;
pub mod responses;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Wire protocol spoken by a client or backend
///
/// Selected once per request from the routing layer's tag; an
/// unrecognized tag is a configuration error, never silently defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// OpenAI-style `/chat/completions` grammar
    ChatCompletions,
    /// Anthropic-style `/messages` grammar
    Messages,
    /// OpenAI-style `/responses` grammar
    Responses,
}

impl Protocol {
    /// All supported protocols
    pub const ALL: [Self; 3] = [Self::ChatCompletions, Self::Messages, Self::Responses];
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ChatCompletions => "chat_completions",
            Self::Messages => "messages",
            Self::Responses => "responses",
        };
        f.write_str(name)
    }
}

impl FromStr for Protocol {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat_completions" | "chat-completions" => Ok(Self::ChatCompletions),
            "messages" => Ok(Self::Messages),
            "responses" => Ok(Self::Responses),
            other => Err(CodecError::UnknownProtocol { tag: other.to_owned() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_tags() {
        assert_eq!("chat_completions".parse::<Protocol>().unwrap(), Protocol::ChatCompletions);
        assert_eq!("chat-completions".parse::<Protocol>().unwrap(), Protocol::ChatCompletions);
        assert_eq!("messages".parse::<Protocol>().unwrap(), Protocol::Messages);
        assert_eq!("responses".parse::<Protocol>().unwrap(), Protocol::Responses);
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let err = "grpc".parse::<Protocol>().unwrap_err();
        assert!(matches!(err, CodecError::UnknownProtocol { tag } if tag == "grpc"));
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for protocol in Protocol::ALL {
            assert_eq!(protocol.to_string().parse::<Protocol>().unwrap(), protocol);
        }
    }
}

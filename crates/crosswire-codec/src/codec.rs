//! Per-protocol request/response translation
//!
//! [`Codec`] is the single capability the routing layer sees: selected
//! once per request from the protocol tag, never by inspecting payload
//! shape. Response decoding routes every assistant turn through the
//! canonicalizer.

use serde::de::DeserializeOwned;

use crosswire_core::{CompletionRequest, CompletionResponse};

use crate::canonical::Canonicalizer;
use crate::convert;
use crate::error::CodecError;
use crate::protocol::chat::{ChatErrorDetail, ChatErrorResponse, ChatRequest, ChatResponse};
use crate::protocol::messages::{MessagesErrorDetail, MessagesErrorResponse, MessagesRequest, MessagesResponse};
use crate::protocol::responses::{ResponsesInput, ResponsesRequest, ResponsesResponse};
use crate::protocol::Protocol;

/// Bidirectional translator for one protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Chat-completions grammar
    ChatCompletions,
    /// Messages grammar
    Messages,
    /// Responses grammar
    Responses,
}

impl Codec {
    /// Select the codec for a protocol tag
    pub const fn for_protocol(protocol: Protocol) -> Self {
        match protocol {
            Protocol::ChatCompletions => Self::ChatCompletions,
            Protocol::Messages => Self::Messages,
            Protocol::Responses => Self::Responses,
        }
    }

    /// The protocol this codec speaks
    pub const fn protocol(self) -> Protocol {
        match self {
            Self::ChatCompletions => Protocol::ChatCompletions,
            Self::Messages => Protocol::Messages,
            Self::Responses => Protocol::Responses,
        }
    }

    /// Decode a native request into canonical form
    ///
    /// Fails fast on a missing model identifier or an empty message list
    /// before attempting the full typed decode.
    pub fn decode_request(self, value: serde_json::Value) -> Result<CompletionRequest, CodecError> {
        self.check_required_fields(&value)?;

        let request = match self {
            Self::ChatCompletions => self.parse::<ChatRequest>(value)?.into(),
            Self::Messages => self.parse::<MessagesRequest>(value)?.into(),
            Self::Responses => {
                let native = self.parse::<ResponsesRequest>(value)?;
                if responses_input_is_empty(&native.input) {
                    return Err(CodecError::MissingField {
                        protocol: Protocol::Responses,
                        field: "input",
                    });
                }
                native.into()
            }
        };

        Ok(request)
    }

    /// Encode a canonical request into the native shape
    pub fn encode_request(self, request: &CompletionRequest) -> serde_json::Value {
        match self {
            Self::ChatCompletions => to_value(&ChatRequest::from(request)),
            Self::Messages => to_value(&MessagesRequest::from(request)),
            Self::Responses => to_value(&ResponsesRequest::from(request)),
        }
    }

    /// Decode a native response, canonicalizing every assistant turn
    pub fn decode_response(
        self,
        value: serde_json::Value,
        canonicalizer: &Canonicalizer,
    ) -> Result<CompletionResponse, CodecError> {
        let response = match self {
            Self::ChatCompletions => convert::chat::decode_response(self.parse::<ChatResponse>(value)?, canonicalizer),
            Self::Messages => {
                convert::messages::decode_response(self.parse::<MessagesResponse>(value)?, canonicalizer)
            }
            Self::Responses => {
                convert::responses::decode_response(self.parse::<ResponsesResponse>(value)?, canonicalizer)
            }
        };

        Ok(response)
    }

    /// Encode a canonical response into the native shape
    pub fn encode_response(self, response: CompletionResponse) -> serde_json::Value {
        match self {
            Self::ChatCompletions => to_value(&ChatResponse::from(response)),
            Self::Messages => to_value(&MessagesResponse::from(response)),
            Self::Responses => to_value(&ResponsesResponse::from(response)),
        }
    }

    /// Encode a codec error into the protocol's native error body
    ///
    /// A decode failure is returned to the client in the shape its own
    /// protocol defines, never as a bare internal error.
    pub fn encode_error_body(self, error: &CodecError) -> serde_json::Value {
        let error_type = "invalid_request_error".to_owned();

        match self {
            Self::ChatCompletions | Self::Responses => to_value(&ChatErrorResponse {
                error: ChatErrorDetail {
                    message: error.to_string(),
                    error_type,
                    param: None,
                    code: None,
                },
            }),
            Self::Messages => to_value(&MessagesErrorResponse {
                error_type: "error".to_owned(),
                error: MessagesErrorDetail {
                    error_type,
                    message: error.to_string(),
                },
            }),
        }
    }

    /// Fail fast on requests missing a model or any messages
    fn check_required_fields(self, value: &serde_json::Value) -> Result<(), CodecError> {
        let protocol = self.protocol();

        let model_present = value
            .get("model")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|m| !m.trim().is_empty());
        if !model_present {
            return Err(CodecError::MissingField { protocol, field: "model" });
        }

        let messages_field = match self {
            Self::ChatCompletions | Self::Messages => "messages",
            Self::Responses => "input",
        };

        match value.get(messages_field) {
            None | Some(serde_json::Value::Null) => Err(CodecError::MissingField {
                protocol,
                field: messages_field,
            }),
            Some(serde_json::Value::Array(items)) if items.is_empty() => Err(CodecError::MissingField {
                protocol,
                field: messages_field,
            }),
            Some(_) => Ok(()),
        }
    }

    fn parse<T: DeserializeOwned>(self, value: serde_json::Value) -> Result<T, CodecError> {
        serde_json::from_value(value).map_err(|e| CodecError::Malformed {
            protocol: self.protocol(),
            detail: e.to_string(),
        })
    }
}

/// Serialize a wire type; wire types contain only JSON-representable data
fn to_value<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Whether a responses-protocol input holds no items at all
///
/// A non-empty string shorthand counts as one message.
fn responses_input_is_empty(input: &ResponsesInput) -> bool {
    match input {
        ResponsesInput::Text(text) => text.is_empty(),
        ResponsesInput::Items(items) => items.is_empty(),
    }
}

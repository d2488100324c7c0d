use thiserror::Error;

use crate::protocol::Protocol;

/// Errors raised while decoding or encoding a native request/response
///
/// All variants are fatal to the single request they occur in and carry
/// enough context (protocol, offending field) to log and alert on.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The protocol tag is not one of the supported grammars
    #[error("unrecognized protocol: {tag}")]
    UnknownProtocol {
        /// The tag as received
        tag: String,
    },

    /// A required field is missing from the native payload
    #[error("{protocol} request missing required field: {field}")]
    MissingField {
        /// Protocol being decoded
        protocol: Protocol,
        /// Dotted path of the missing field
        field: &'static str,
    },

    /// The native payload does not match the protocol's shape
    #[error("malformed {protocol} payload: {detail}")]
    Malformed {
        /// Protocol being decoded
        protocol: Protocol,
        /// What failed to parse
        detail: String,
    },
}

/// Errors raised by the streaming transformer
///
/// All variants are fatal to the stream; the transformer emits the
/// protocol's native error frame before entering its terminal state.
#[derive(Debug, Error)]
pub enum StreamError {
    /// An event arrived that violates the per-stream state machine
    #[error("stream state violation: {detail}")]
    StateViolation {
        /// What was violated
        detail: String,
    },

    /// An event arrived after the stream closed
    #[error("stream is closed")]
    Closed,

    /// The upstream producer failed
    #[error("upstream error: {message}")]
    Upstream {
        /// Failure detail from the producer side
        message: String,
    },
}

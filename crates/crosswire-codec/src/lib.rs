//! Cross-protocol tool-call canonicalization and streaming transformation
//!
//! Translates chat-completions, messages, and responses wire shapes into
//! one canonical representation and back, recovering tool calls that
//! backends emitted as free text, repairing malformed argument payloads,
//! and re-serializing canonical event streams into whichever protocol the
//! client originally spoke.
//!
//! Entry points:
//! - [`Codec`] — per-protocol request/response translation
//! - [`canonical::Canonicalizer`] — assistant-turn normalization
//! - [`stream::StreamTransformer`] — canonical events → native SSE frames
//! - [`stream::spawn_pump`] — bounded producer/consumer event bridging

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod canonical;
pub mod codec;
pub mod convert;
pub mod error;
pub mod protocol;
pub mod stream;

pub use canonical::Canonicalizer;
pub use codec::Codec;
pub use error::{CodecError, StreamError};
pub use protocol::Protocol;
pub use stream::{SseFrame, StreamTransformer};

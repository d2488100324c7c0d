//! Protocol-independent stream state machine
//!
//! One [`TurnState`] backs each protocol transformer. It enforces the
//! per-stream lifecycle (`Idle → RoleSent → (Content | ToolCall)* →
//! Completed → Closed`), per-call event ordering, the exactly-once
//! completion signal, and argument coalescing. The protocol transformers
//! only translate its decisions into frames.

use crosswire_core::FinishReason;

use crate::canonical::repair;
use crate::error::StreamError;

/// Lifecycle phase of one response stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    RoleSent,
    ToolCall,
    Completed,
    Closed,
}

/// A tool call currently receiving argument fragments
#[derive(Debug)]
struct OpenCall {
    id: String,
    name: String,
    ordinal: u32,
    assembled: String,
    forwarded: bool,
}

/// A tool call whose arguments are complete and valid
#[derive(Debug, Clone)]
pub(crate) struct FinishedCall {
    pub id: String,
    pub name: String,
    /// Final argument string; always parses as JSON
    pub arguments: String,
    /// Zero-based position among the turn's tool calls
    pub ordinal: u32,
}

/// Outcome of closing a call's argument stream
#[derive(Debug)]
pub(crate) struct ClosedArgs {
    /// Fragment that must still reach the client so its assembled string
    /// parses: the whole coalesced payload, or a repair suffix
    pub trailing_fragment: Option<String>,
    pub call: FinishedCall,
}

/// Outcome of starting a call
#[derive(Debug)]
pub(crate) struct StartedCall {
    pub ordinal: u32,
    /// A still-open previous call that had to be closed implicitly
    pub implicit_close: Option<ClosedArgs>,
}

/// Outcome of the completion event
#[derive(Debug)]
pub(crate) struct CompletedTurn {
    /// A still-open call that had to be closed implicitly
    pub implicit_close: Option<ClosedArgs>,
    /// Finish reason derived from the final canonical call list
    pub finish_reason: FinishReason,
}

#[derive(Debug)]
pub(crate) struct TurnState {
    phase: Phase,
    coalesce: bool,
    open: Option<OpenCall>,
    finished: Vec<FinishedCall>,
    started: u32,
}

impl TurnState {
    pub fn new(coalesce: bool) -> Self {
        Self {
            phase: Phase::Idle,
            coalesce,
            open: None,
            finished: Vec::new(),
            started: 0,
        }
    }

    pub const fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Closed)
    }

    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }

    /// Ordinal of the currently open call, if any
    pub fn open_ordinal(&self) -> Option<u32> {
        self.open.as_ref().map(|open| open.ordinal)
    }

    /// Handle `RoleStart`; `true` means turn-start framing must be emitted
    pub fn role_start(&mut self) -> Result<bool, StreamError> {
        match self.phase {
            Phase::Closed => Err(StreamError::Closed),
            Phase::Completed => self.violation("role start after completion"),
            Phase::Idle => {
                self.phase = Phase::RoleSent;
                Ok(true)
            }
            // Replayed turn-start events are idempotent.
            Phase::RoleSent | Phase::ToolCall => Ok(false),
        }
    }

    /// Handle `ContentDelta`; `true` means the text may be forwarded
    pub fn content_delta(&mut self) -> Result<bool, StreamError> {
        match self.phase {
            Phase::Closed => Err(StreamError::Closed),
            Phase::Completed => self.violation("content delta after completion"),
            Phase::ToolCall => {
                // Text and tool-call streaming never interleave in
                // client-visible output.
                tracing::debug!("dropping content delta while a tool call is open");
                Ok(false)
            }
            Phase::Idle | Phase::RoleSent => {
                self.phase = Phase::RoleSent;
                Ok(true)
            }
        }
    }

    /// Handle `ToolCallStart`; `None` means a replayed start was ignored
    pub fn start_call(&mut self, id: &str, name: &str) -> Result<Option<StartedCall>, StreamError> {
        match self.phase {
            Phase::Closed => return Err(StreamError::Closed),
            Phase::Completed => return self.violation("tool call start after completion"),
            _ => {}
        }

        if self.open.as_ref().is_some_and(|open| open.id == id) {
            return Ok(None);
        }
        if self.finished.iter().any(|call| call.id == id) {
            return self.violation("tool call restarted after done");
        }

        let implicit_close = self.open.take().map(|open| {
            tracing::debug!(id = %open.id, "implicitly closing tool call on new start");
            self.finish_open(open)
        });

        let ordinal = self.started;
        self.started += 1;
        self.open = Some(OpenCall {
            id: id.to_owned(),
            name: name.to_owned(),
            ordinal,
            assembled: String::new(),
            forwarded: false,
        });
        self.phase = Phase::ToolCall;

        Ok(Some(StartedCall { ordinal, implicit_close }))
    }

    /// Handle `ToolCallArgsDelta`; `Some` carries the fragment to forward
    pub fn args_delta(&mut self, id: &str, fragment: String) -> Result<Option<String>, StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }

        match &mut self.open {
            Some(open) if open.id == id => {
                open.assembled.push_str(&fragment);
                if self.coalesce {
                    Ok(None)
                } else {
                    open.forwarded = true;
                    Ok(Some(fragment))
                }
            }
            _ => {
                if self.finished.iter().any(|call| call.id == id) {
                    self.violation("argument delta after done")
                } else {
                    self.violation("argument delta without start")
                }
            }
        }
    }

    /// Handle `ToolCallArgsDone`; `None` means a replayed done was ignored
    pub fn args_done(&mut self, id: &str) -> Result<Option<ClosedArgs>, StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }

        match self.open.take() {
            Some(open) if open.id == id => {
                let closed = self.finish_open(open);
                self.phase = Phase::RoleSent;
                Ok(Some(closed))
            }
            other => {
                self.open = other;
                if self.finished.iter().any(|call| call.id == id) {
                    Ok(None)
                } else {
                    self.violation("argument done without start")
                }
            }
        }
    }

    /// Handle `Completion`; `None` means a duplicate signal was swallowed
    pub fn complete(&mut self, upstream: FinishReason) -> Result<Option<CompletedTurn>, StreamError> {
        match self.phase {
            Phase::Closed => return Err(StreamError::Closed),
            Phase::Completed => {
                // The action-required signal is emitted exactly once even
                // if the upstream attempted to signal it twice.
                tracing::warn!("swallowing duplicate completion signal");
                return Ok(None);
            }
            _ => {}
        }

        let implicit_close = self.open.take().map(|open| {
            tracing::debug!(id = %open.id, "implicitly closing tool call at completion");
            self.finish_open(open)
        });
        self.phase = Phase::Completed;

        let finish_reason = if self.finished.is_empty() { upstream } else { FinishReason::ToolCalls };

        Ok(Some(CompletedTurn {
            implicit_close,
            finish_reason,
        }))
    }

    /// Close an open call, guaranteeing its final argument string parses
    fn finish_open(&mut self, open: OpenCall) -> ClosedArgs {
        let OpenCall {
            id,
            name,
            ordinal,
            assembled,
            forwarded,
        } = open;

        let (arguments, trailing_fragment) = if forwarded {
            // Fragments already reached the client verbatim; all that may
            // still be sent is a suffix.
            match repair::completion_suffix(&assembled) {
                Some(suffix) if suffix.is_empty() => (assembled, None),
                Some(suffix) => {
                    let full = format!("{assembled}{suffix}");
                    (full, Some(suffix))
                }
                None => {
                    tracing::warn!(id = %id, "forwarded argument stream is beyond repair");
                    (repair::repair(&assembled), None)
                }
            }
        } else {
            // Nothing forwarded yet (coalescing, or an empty stream): the
            // repaired payload goes out as one fragment.
            let full = repair::repair(&assembled);
            (full.clone(), Some(full))
        };

        let call = FinishedCall {
            id,
            name,
            arguments,
            ordinal,
        };
        self.finished.push(call.clone());

        ClosedArgs {
            trailing_fragment,
            call,
        }
    }

    fn violation<T>(&mut self, detail: &str) -> Result<T, StreamError> {
        self.phase = Phase::Closed;
        Err(StreamError::StateViolation {
            detail: detail.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_happy_path() {
        let mut state = TurnState::new(false);

        assert!(state.role_start().unwrap());
        assert!(!state.role_start().unwrap());

        let started = state.start_call("call_1", "foo").unwrap().unwrap();
        assert_eq!(started.ordinal, 0);

        assert_eq!(
            state.args_delta("call_1", "{\"a\":1}".to_owned()).unwrap().as_deref(),
            Some("{\"a\":1}")
        );

        let closed = state.args_done("call_1").unwrap().unwrap();
        assert_eq!(closed.call.arguments, "{\"a\":1}");
        assert!(closed.trailing_fragment.is_none());

        let completed = state.complete(FinishReason::Stop).unwrap().unwrap();
        assert_eq!(completed.finish_reason, FinishReason::ToolCalls);
    }

    #[test]
    fn coalescing_defers_fragments_until_done() {
        let mut state = TurnState::new(true);
        state.role_start().unwrap();
        state.start_call("call_1", "foo").unwrap();

        assert!(state.args_delta("call_1", "{\"a\":".to_owned()).unwrap().is_none());
        assert!(state.args_delta("call_1", "1}".to_owned()).unwrap().is_none());

        let closed = state.args_done("call_1").unwrap().unwrap();
        assert_eq!(closed.trailing_fragment.as_deref(), Some("{\"a\":1}"));
        assert_eq!(closed.call.arguments, "{\"a\":1}");
    }

    #[test]
    fn truncated_forwarded_arguments_get_a_suffix() {
        let mut state = TurnState::new(false);
        state.role_start().unwrap();
        state.start_call("call_1", "foo").unwrap();
        state.args_delta("call_1", "{\"a\": {\"b\": 1".to_owned()).unwrap();

        let closed = state.args_done("call_1").unwrap().unwrap();
        assert_eq!(closed.trailing_fragment.as_deref(), Some("}}"));
        serde_json::from_str::<serde_json::Value>(&closed.call.arguments).unwrap();
    }

    #[test]
    fn empty_argument_stream_yields_empty_object() {
        let mut state = TurnState::new(false);
        state.role_start().unwrap();
        state.start_call("call_1", "foo").unwrap();

        let closed = state.args_done("call_1").unwrap().unwrap();
        assert_eq!(closed.trailing_fragment.as_deref(), Some("{}"));
        assert_eq!(closed.call.arguments, "{}");
    }

    #[test]
    fn delta_after_done_is_a_violation() {
        let mut state = TurnState::new(false);
        state.role_start().unwrap();
        state.start_call("call_1", "foo").unwrap();
        state.args_done("call_1").unwrap();

        let err = state.args_delta("call_1", "{}".to_owned()).unwrap_err();
        assert!(matches!(err, StreamError::StateViolation { .. }));
        assert!(state.is_closed());
    }

    #[test]
    fn delta_without_start_is_a_violation() {
        let mut state = TurnState::new(false);
        state.role_start().unwrap();
        let err = state.args_delta("ghost", "{}".to_owned()).unwrap_err();
        assert!(matches!(err, StreamError::StateViolation { .. }));
    }

    #[test]
    fn duplicate_completion_is_swallowed() {
        let mut state = TurnState::new(false);
        state.role_start().unwrap();
        assert!(state.complete(FinishReason::Stop).unwrap().is_some());
        assert!(state.complete(FinishReason::Stop).unwrap().is_none());
    }

    #[test]
    fn events_after_close_are_rejected() {
        let mut state = TurnState::new(false);
        state.close();
        assert!(matches!(state.role_start(), Err(StreamError::Closed)));
        assert!(matches!(state.content_delta(), Err(StreamError::Closed)));
    }

    #[test]
    fn completion_implicitly_closes_open_call() {
        let mut state = TurnState::new(false);
        state.role_start().unwrap();
        state.start_call("call_1", "foo").unwrap();
        state.args_delta("call_1", "{\"a\":1".to_owned()).unwrap();

        let completed = state.complete(FinishReason::Stop).unwrap().unwrap();
        let closed = completed.implicit_close.unwrap();
        assert_eq!(closed.trailing_fragment.as_deref(), Some("}"));
        assert_eq!(completed.finish_reason, FinishReason::ToolCalls);
    }

    #[test]
    fn content_is_dropped_while_call_open() {
        let mut state = TurnState::new(false);
        state.role_start().unwrap();
        state.start_call("call_1", "foo").unwrap();
        assert!(!state.content_delta().unwrap());
    }
}

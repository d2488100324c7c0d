//! Chat-completions stream emitter

use crosswire_core::CanonicalEvent;

use crate::error::StreamError;
use crate::protocol::chat::{
    ChatStreamChoice, ChatStreamChunk, ChatStreamDelta, ChatStreamFunctionCall, ChatStreamToolCall, ChatUsage,
};

use super::SseFrame;
use super::state::{ClosedArgs, TurnState};
use super::transformer::StreamContext;

/// Emits the chat-completions chunk grammar
///
/// Data-only frames; the terminal sentinel is the literal `[DONE]`.
#[derive(Debug)]
pub struct ChatTransformer {
    ctx: StreamContext,
    state: TurnState,
    error_emitted: bool,
}

impl ChatTransformer {
    pub(super) fn new(ctx: StreamContext) -> Self {
        let coalesce = ctx.coalesce_tool_args;
        Self {
            ctx,
            state: TurnState::new(coalesce),
            error_emitted: false,
        }
    }

    pub(super) fn push(&mut self, event: CanonicalEvent) -> Result<Vec<SseFrame>, StreamError> {
        match event {
            CanonicalEvent::RoleStart => {
                if self.state.role_start()? {
                    Ok(vec![self.chunk(
                        ChatStreamDelta {
                            role: Some("assistant".to_owned()),
                            ..ChatStreamDelta::default()
                        },
                        None,
                    )])
                } else {
                    Ok(Vec::new())
                }
            }

            CanonicalEvent::ContentDelta { text } => {
                if self.state.content_delta()? {
                    Ok(vec![self.chunk(
                        ChatStreamDelta {
                            content: Some(text),
                            ..ChatStreamDelta::default()
                        },
                        None,
                    )])
                } else {
                    Ok(Vec::new())
                }
            }

            CanonicalEvent::ToolCallStart { id, name } => {
                let Some(started) = self.state.start_call(&id, &name)? else {
                    return Ok(Vec::new());
                };

                let mut frames = Vec::new();
                if let Some(closed) = started.implicit_close {
                    frames.extend(self.trailing_frames(&closed));
                }
                frames.push(self.chunk(
                    tool_call_delta(started.ordinal, Some(id), Some(name), Some(String::new())),
                    None,
                ));
                Ok(frames)
            }

            CanonicalEvent::ToolCallArgsDelta { id, fragment } => {
                let ordinal = self.state.open_ordinal();
                match self.state.args_delta(&id, fragment)? {
                    Some(forward) => {
                        let ordinal = ordinal.unwrap_or_default();
                        Ok(vec![self.chunk(tool_call_delta(ordinal, None, None, Some(forward)), None)])
                    }
                    None => Ok(Vec::new()),
                }
            }

            CanonicalEvent::ToolCallArgsDone { id } => Ok(self
                .state
                .args_done(&id)?
                .map(|closed| self.trailing_frames(&closed))
                .unwrap_or_default()),

            CanonicalEvent::Completion { finish_reason, usage } => {
                let Some(completed) = self.state.complete(finish_reason)? else {
                    return Ok(Vec::new());
                };

                let mut frames = Vec::new();
                if let Some(closed) = completed.implicit_close {
                    frames.extend(self.trailing_frames(&closed));
                }

                frames.push(self.chunk(
                    ChatStreamDelta::default(),
                    Some(crate::convert::chat::finish_reason_str(completed.finish_reason)),
                ));

                if let Some(usage) = usage {
                    frames.push(self.usage_chunk(usage.into()));
                }

                frames.push(SseFrame::data_only("[DONE]"));
                Ok(frames)
            }

            CanonicalEvent::Error { message, .. } => Ok(self.fail(&message)),
        }
    }

    pub(super) fn fail(&mut self, message: &str) -> Vec<SseFrame> {
        if self.error_emitted {
            return Vec::new();
        }
        self.error_emitted = true;
        self.state.close();

        let body = serde_json::json!({
            "error": {
                "message": message,
                "type": "upstream_error",
            }
        });
        vec![SseFrame::data_only(body.to_string())]
    }

    pub(super) fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Frames for a closed call's still-unsent argument data
    fn trailing_frames(&self, closed: &ClosedArgs) -> Vec<SseFrame> {
        closed
            .trailing_fragment
            .as_ref()
            .map(|fragment| {
                vec![self.chunk(
                    tool_call_delta(closed.call.ordinal, None, None, Some(fragment.clone())),
                    None,
                )]
            })
            .unwrap_or_default()
    }

    fn chunk(&self, delta: ChatStreamDelta, finish_reason: Option<&str>) -> SseFrame {
        let chunk = ChatStreamChunk {
            id: self.ctx.response_id.clone(),
            object: "chat.completion.chunk".to_owned(),
            created: self.ctx.created,
            model: self.ctx.model.clone(),
            choices: vec![ChatStreamChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(ToOwned::to_owned),
            }],
            usage: None,
        };
        SseFrame::data_only(serde_json::to_string(&chunk).unwrap_or_default())
    }

    fn usage_chunk(&self, usage: ChatUsage) -> SseFrame {
        let chunk = ChatStreamChunk {
            id: self.ctx.response_id.clone(),
            object: "chat.completion.chunk".to_owned(),
            created: self.ctx.created,
            model: self.ctx.model.clone(),
            choices: vec![],
            usage: Some(usage),
        };
        SseFrame::data_only(serde_json::to_string(&chunk).unwrap_or_default())
    }
}

fn tool_call_delta(index: u32, id: Option<String>, name: Option<String>, arguments: Option<String>) -> ChatStreamDelta {
    ChatStreamDelta {
        role: None,
        content: None,
        tool_calls: Some(vec![ChatStreamToolCall {
            index,
            tool_type: id.as_ref().map(|_| "function".to_owned()),
            id,
            function: Some(ChatStreamFunctionCall { name, arguments }),
        }]),
    }
}

//! Messages-protocol stream emitter

use crosswire_core::CanonicalEvent;

use crate::convert::messages::messages_stop_reason;
use crate::error::StreamError;
use crate::protocol::messages::{
    MessagesErrorDetail, MessagesMessageDelta, MessagesStreamContentBlock, MessagesStreamDelta, MessagesStreamEvent,
    MessagesStreamMessage, MessagesUsage,
};

use super::SseFrame;
use super::state::{ClosedArgs, TurnState};
use super::transformer::StreamContext;

/// Emits the messages-protocol block grammar
///
/// Every frame carries its SSE event name. The content-block index is
/// shared across text and tool_use blocks, so the transformer allocates
/// indexes as blocks open.
#[derive(Debug)]
pub struct MessagesTransformer {
    ctx: StreamContext,
    state: TurnState,
    error_emitted: bool,
    next_block: u32,
    text_block: Option<u32>,
    tool_block: Option<u32>,
}

impl MessagesTransformer {
    pub(super) fn new(ctx: StreamContext) -> Self {
        let coalesce = ctx.coalesce_tool_args;
        Self {
            ctx,
            state: TurnState::new(coalesce),
            error_emitted: false,
            next_block: 0,
            text_block: None,
            tool_block: None,
        }
    }

    pub(super) fn push(&mut self, event: CanonicalEvent) -> Result<Vec<SseFrame>, StreamError> {
        match event {
            CanonicalEvent::RoleStart => {
                if self.state.role_start()? {
                    Ok(vec![frame(&MessagesStreamEvent::MessageStart {
                        message: MessagesStreamMessage {
                            id: self.ctx.response_id.clone(),
                            message_type: "message".to_owned(),
                            role: "assistant".to_owned(),
                            model: self.ctx.model.clone(),
                            usage: None,
                        },
                    })])
                } else {
                    Ok(Vec::new())
                }
            }

            CanonicalEvent::ContentDelta { text } => {
                if !self.state.content_delta()? {
                    return Ok(Vec::new());
                }

                let mut frames = Vec::new();
                let index = match self.text_block {
                    Some(index) => index,
                    None => {
                        let index = self.allocate_block();
                        self.text_block = Some(index);
                        frames.push(frame(&MessagesStreamEvent::ContentBlockStart {
                            index,
                            content_block: MessagesStreamContentBlock::Text { text: String::new() },
                        }));
                        index
                    }
                };

                frames.push(frame(&MessagesStreamEvent::ContentBlockDelta {
                    index,
                    delta: MessagesStreamDelta::TextDelta { text },
                }));
                Ok(frames)
            }

            CanonicalEvent::ToolCallStart { id, name } => {
                let Some(started) = self.state.start_call(&id, &name)? else {
                    return Ok(Vec::new());
                };

                let mut frames = Vec::new();
                if let Some(closed) = started.implicit_close {
                    frames.extend(self.close_tool_block(&closed));
                }
                frames.extend(self.close_text_block());

                let index = self.allocate_block();
                self.tool_block = Some(index);
                frames.push(frame(&MessagesStreamEvent::ContentBlockStart {
                    index,
                    content_block: MessagesStreamContentBlock::ToolUse {
                        id,
                        name,
                        input: serde_json::json!({}),
                    },
                }));
                Ok(frames)
            }

            CanonicalEvent::ToolCallArgsDelta { id, fragment } => {
                match self.state.args_delta(&id, fragment)? {
                    Some(forward) => {
                        let index = self.tool_block.unwrap_or_default();
                        Ok(vec![frame(&MessagesStreamEvent::ContentBlockDelta {
                            index,
                            delta: MessagesStreamDelta::InputJsonDelta { partial_json: forward },
                        })])
                    }
                    None => Ok(Vec::new()),
                }
            }

            CanonicalEvent::ToolCallArgsDone { id } => Ok(self
                .state
                .args_done(&id)?
                .map(|closed| self.close_tool_block(&closed))
                .unwrap_or_default()),

            CanonicalEvent::Completion { finish_reason, usage } => {
                let Some(completed) = self.state.complete(finish_reason)? else {
                    return Ok(Vec::new());
                };

                let mut frames = Vec::new();
                if let Some(closed) = completed.implicit_close {
                    frames.extend(self.close_tool_block(&closed));
                }
                frames.extend(self.close_text_block());

                frames.push(frame(&MessagesStreamEvent::MessageDelta {
                    delta: MessagesMessageDelta {
                        stop_reason: Some(messages_stop_reason(completed.finish_reason).to_owned()),
                        stop_sequence: None,
                    },
                    usage: usage.map(|u| MessagesUsage {
                        input_tokens: u.prompt_tokens,
                        output_tokens: u.completion_tokens,
                    }),
                }));
                frames.push(frame(&MessagesStreamEvent::MessageStop));
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

        vec![frame(&MessagesStreamEvent::Error {
            error: MessagesErrorDetail {
                error_type: "upstream_error".to_owned(),
                message: message.to_owned(),
            },
        })]
    }

    pub(super) fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn allocate_block(&mut self) -> u32 {
        let index = self.next_block;
        self.next_block += 1;
        index
    }

    /// Close the open text block, if any
    fn close_text_block(&mut self) -> Vec<SseFrame> {
        self.text_block
            .take()
            .map(|index| vec![frame(&MessagesStreamEvent::ContentBlockStop { index })])
            .unwrap_or_default()
    }

    /// Flush a closed call's trailing fragment and stop its block
    fn close_tool_block(&mut self, closed: &ClosedArgs) -> Vec<SseFrame> {
        let Some(index) = self.tool_block.take() else {
            return Vec::new();
        };

        let mut frames = Vec::new();
        if let Some(fragment) = &closed.trailing_fragment {
            frames.push(frame(&MessagesStreamEvent::ContentBlockDelta {
                index,
                delta: MessagesStreamDelta::InputJsonDelta {
                    partial_json: fragment.clone(),
                },
            }));
        }
        frames.push(frame(&MessagesStreamEvent::ContentBlockStop { index }));
        frames
    }
}

fn frame(event: &MessagesStreamEvent) -> SseFrame {
    SseFrame::named(event.event_name(), serde_json::to_string(event).unwrap_or_default())
}

//! Responses-protocol stream emitter

use crosswire_core::{CanonicalEvent, Usage};

use crate::error::StreamError;
use crate::protocol::responses::{
    ResponsesOutputItem, ResponsesOutputText, ResponsesResponse, ResponsesStreamEvent, ResponsesUsage,
};

use super::SseFrame;
use super::state::{ClosedArgs, TurnState};
use super::transformer::StreamContext;

/// Emits the responses-protocol output-item grammar
///
/// The action-required signal is the presence of function-call items in
/// the final `response.completed` payload; the transformer guarantees it
/// appears exactly once.
#[derive(Debug)]
pub struct ResponsesTransformer {
    ctx: StreamContext,
    state: TurnState,
    error_emitted: bool,
    next_output_index: u32,
    message_item: Option<MessageItem>,
    current_call: Option<CallItem>,
    items_done: Vec<ResponsesOutputItem>,
}

#[derive(Debug)]
struct MessageItem {
    id: String,
    index: u32,
    text: String,
}

#[derive(Debug)]
struct CallItem {
    id: String,
    index: u32,
}

impl ResponsesTransformer {
    pub(super) fn new(ctx: StreamContext) -> Self {
        let coalesce = ctx.coalesce_tool_args;
        Self {
            ctx,
            state: TurnState::new(coalesce),
            error_emitted: false,
            next_output_index: 0,
            message_item: None,
            current_call: None,
            items_done: Vec::new(),
        }
    }

    pub(super) fn push(&mut self, event: CanonicalEvent) -> Result<Vec<SseFrame>, StreamError> {
        match event {
            CanonicalEvent::RoleStart => {
                if self.state.role_start()? {
                    let response = self.response_snapshot("in_progress", Vec::new(), None);
                    Ok(vec![frame(&ResponsesStreamEvent::Created { response })])
                } else {
                    Ok(Vec::new())
                }
            }

            CanonicalEvent::ContentDelta { text } => {
                if !self.state.content_delta()? {
                    return Ok(Vec::new());
                }

                let mut frames = Vec::new();
                if self.message_item.is_none() {
                    let index = self.allocate_index();
                    let item = MessageItem {
                        id: format!("msg_{}", self.ctx.response_id),
                        index,
                        text: String::new(),
                    };
                    frames.push(frame(&ResponsesStreamEvent::OutputItemAdded {
                        output_index: index,
                        item: ResponsesOutputItem::Message {
                            id: item.id.clone(),
                            role: "assistant".to_owned(),
                            content: Vec::new(),
                        },
                    }));
                    self.message_item = Some(item);
                }

                let item = self.message_item.as_mut().expect("message item just ensured");
                item.text.push_str(&text);
                frames.push(frame(&ResponsesStreamEvent::OutputTextDelta {
                    item_id: item.id.clone(),
                    output_index: item.index,
                    delta: text,
                }));
                Ok(frames)
            }

            CanonicalEvent::ToolCallStart { id, name } => {
                let Some(started) = self.state.start_call(&id, &name)? else {
                    return Ok(Vec::new());
                };

                let mut frames = Vec::new();
                if let Some(closed) = started.implicit_close {
                    frames.extend(self.close_call_item(&closed));
                }
                frames.extend(self.close_message_item());

                let index = self.allocate_index();
                frames.push(frame(&ResponsesStreamEvent::OutputItemAdded {
                    output_index: index,
                    item: ResponsesOutputItem::FunctionCall {
                        id: id.clone(),
                        call_id: id.clone(),
                        name,
                        arguments: String::new(),
                        status: Some("in_progress".to_owned()),
                    },
                }));
                self.current_call = Some(CallItem { id, index });
                Ok(frames)
            }

            CanonicalEvent::ToolCallArgsDelta { id, fragment } => {
                match self.state.args_delta(&id, fragment)? {
                    Some(forward) => {
                        let (item_id, index) = self
                            .current_call
                            .as_ref()
                            .map(|call| (call.id.clone(), call.index))
                            .unwrap_or_default();
                        Ok(vec![frame(&ResponsesStreamEvent::FunctionCallArgumentsDelta {
                            item_id,
                            output_index: index,
                            delta: forward,
                        })])
                    }
                    None => Ok(Vec::new()),
                }
            }

            CanonicalEvent::ToolCallArgsDone { id } => Ok(self
                .state
                .args_done(&id)?
                .map(|closed| self.close_call_item(&closed))
                .unwrap_or_default()),

            CanonicalEvent::Completion { finish_reason, usage } => {
                let Some(completed) = self.state.complete(finish_reason)? else {
                    return Ok(Vec::new());
                };

                let mut frames = Vec::new();
                if let Some(closed) = completed.implicit_close {
                    frames.extend(self.close_call_item(&closed));
                }
                frames.extend(self.close_message_item());

                let status = match completed.finish_reason {
                    crosswire_core::FinishReason::Length => "incomplete",
                    _ => "completed",
                };
                let response = self.response_snapshot(status, self.items_done.clone(), usage);
                frames.push(frame(&ResponsesStreamEvent::Completed { response }));
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

        vec![frame(&ResponsesStreamEvent::Error {
            code: "upstream_error".to_owned(),
            message: message.to_owned(),
        })]
    }

    pub(super) fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn allocate_index(&mut self) -> u32 {
        let index = self.next_output_index;
        self.next_output_index += 1;
        index
    }

    /// Finish the open message item, recording it in the final output
    fn close_message_item(&mut self) -> Vec<SseFrame> {
        let Some(item) = self.message_item.take() else {
            return Vec::new();
        };

        let done = ResponsesOutputItem::Message {
            id: item.id,
            role: "assistant".to_owned(),
            content: vec![ResponsesOutputText {
                part_type: "output_text".to_owned(),
                text: item.text,
            }],
        };
        self.items_done.push(done.clone());

        vec![frame(&ResponsesStreamEvent::OutputItemDone {
            output_index: item.index,
            item: done,
        })]
    }

    /// Flush a closed call's trailing fragment and finish its item
    fn close_call_item(&mut self, closed: &ClosedArgs) -> Vec<SseFrame> {
        let Some(call) = self.current_call.take() else {
            return Vec::new();
        };

        let mut frames = Vec::new();
        if let Some(fragment) = &closed.trailing_fragment {
            frames.push(frame(&ResponsesStreamEvent::FunctionCallArgumentsDelta {
                item_id: call.id.clone(),
                output_index: call.index,
                delta: fragment.clone(),
            }));
        }

        frames.push(frame(&ResponsesStreamEvent::FunctionCallArgumentsDone {
            item_id: call.id.clone(),
            output_index: call.index,
            arguments: closed.call.arguments.clone(),
        }));

        let done = ResponsesOutputItem::FunctionCall {
            id: call.id.clone(),
            call_id: closed.call.id.clone(),
            name: closed.call.name.clone(),
            arguments: closed.call.arguments.clone(),
            status: Some("completed".to_owned()),
        };
        self.items_done.push(done.clone());

        frames.push(frame(&ResponsesStreamEvent::OutputItemDone {
            output_index: call.index,
            item: done,
        }));
        frames
    }

    fn response_snapshot(
        &self,
        status: &str,
        output: Vec<ResponsesOutputItem>,
        usage: Option<Usage>,
    ) -> ResponsesResponse {
        ResponsesResponse {
            id: self.ctx.response_id.clone(),
            object: "response".to_owned(),
            created_at: self.ctx.created,
            status: status.to_owned(),
            model: self.ctx.model.clone(),
            output,
            usage: usage.map(|u| ResponsesUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        }
    }
}

fn frame(event: &ResponsesStreamEvent) -> SseFrame {
    SseFrame::named(event.event_name(), serde_json::to_string(event).unwrap_or_default())
}

//! Conversion between canonical types and the chat-completions wire format

use crosswire_core::{
    CanonicalEvent, Choice, CompletionParams, CompletionRequest, CompletionResponse, ErrorKind, FinishReason, Message,
    Role, ToolCall, ToolChoice, ToolChoiceFunction, ToolChoiceMode, ToolDefinition, Usage,
};

use crate::canonical::{AssistantTurn, Canonicalizer, generate_call_id};
use crate::protocol::chat::{
    ChatChoice, ChatChoiceMessage, ChatContent, ChatFunctionCall, ChatFunctionDecl, ChatMessage, ChatRequest,
    ChatResponse, ChatStreamChunk, ChatToolCall, ChatToolDecl, ChatUsage,
};

// -- Inbound: chat wire format -> canonical types --

impl From<ChatRequest> for CompletionRequest {
    fn from(req: ChatRequest) -> Self {
        Self {
            model: req.model,
            messages: req.messages.into_iter().map(Into::into).collect(),
            params: CompletionParams {
                temperature: req.temperature,
                top_p: req.top_p,
                max_tokens: req.max_tokens,
                stop: req.stop,
            },
            tools: req.tools.map(|tools| tools.into_iter().map(Into::into).collect()),
            tool_choice: req.tool_choice.and_then(|v| parse_chat_tool_choice(&v)),
            stream: req.stream.unwrap_or(false),
        }
    }
}

impl From<ChatMessage> for Message {
    fn from(msg: ChatMessage) -> Self {
        let role = parse_role(&msg.role);

        let tool_calls: Vec<ToolCall> = msg
            .tool_calls
            .map(|calls| calls.into_iter().map(Into::into).collect())
            .unwrap_or_default();

        // A tool-calling turn never also carries content.
        let content = if tool_calls.is_empty() {
            msg.content.as_ref().map(ChatContent::as_text)
        } else {
            None
        };

        Self {
            role,
            content,
            name: msg.name,
            tool_calls,
            tool_call_id: msg.tool_call_id,
        }
    }
}

impl From<ChatToolCall> for ToolCall {
    fn from(tc: ChatToolCall) -> Self {
        Self::new(tc.id, tc.function.name, tc.function.arguments)
    }
}

impl From<ChatToolDecl> for ToolDefinition {
    fn from(decl: ChatToolDecl) -> Self {
        // Both the nested function shape and the flat shape normalize to
        // the same definition.
        let function = match decl {
            ChatToolDecl::Nested { function, .. } | ChatToolDecl::Flat(function) => function,
        };
        Self::function(function.name, function.description, function.parameters)
    }
}

fn parse_role(role: &str) -> Role {
    match role {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

/// Parse the flexible `tool_choice` field (string mode or function object)
fn parse_chat_tool_choice(value: &serde_json::Value) -> Option<ToolChoice> {
    match value {
        serde_json::Value::String(s) => match s.as_str() {
            "none" => Some(ToolChoice::Mode(ToolChoiceMode::None)),
            "auto" => Some(ToolChoice::Mode(ToolChoiceMode::Auto)),
            "required" => Some(ToolChoice::Mode(ToolChoiceMode::Required)),
            _ => None,
        },
        serde_json::Value::Object(map) => map
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(serde_json::Value::as_str)
            .map(|name| ToolChoice::Function(ToolChoiceFunction { name: name.to_owned() })),
        _ => None,
    }
}

// -- Outbound: canonical types -> chat wire format --

impl From<&CompletionRequest> for ChatRequest {
    fn from(req: &CompletionRequest) -> Self {
        Self {
            model: req.model.clone(),
            messages: req.messages.iter().map(Into::into).collect(),
            temperature: req.params.temperature,
            top_p: req.params.top_p,
            max_tokens: req.params.max_tokens,
            stop: req.params.stop.clone(),
            stream: if req.stream { Some(true) } else { None },
            tools: req.tools.as_ref().map(|tools| {
                tools
                    .iter()
                    .map(|t| ChatToolDecl::Nested {
                        tool_type: t.tool_type.clone(),
                        function: ChatFunctionDecl {
                            name: t.function.name.clone(),
                            description: t.function.description.clone(),
                            parameters: t.function.parameters.clone(),
                        },
                    })
                    .collect()
            }),
            tool_choice: req.tool_choice.as_ref().map(tool_choice_to_chat_value),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };

        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(msg.tool_calls.iter().map(chat_tool_call).collect())
        };

        Self {
            role: role.to_owned(),
            content: msg.content.clone().map(ChatContent::Text),
            name: msg.name.clone(),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

fn chat_tool_call(tc: &ToolCall) -> ChatToolCall {
    ChatToolCall {
        id: tc.id.clone(),
        tool_type: "function".to_owned(),
        function: ChatFunctionCall {
            name: tc.function.name.clone(),
            arguments: tc.function.arguments.clone(),
        },
    }
}

fn tool_choice_to_chat_value(choice: &ToolChoice) -> serde_json::Value {
    match choice {
        ToolChoice::Mode(mode) => {
            let s = match mode {
                ToolChoiceMode::None => "none",
                ToolChoiceMode::Auto => "auto",
                ToolChoiceMode::Required => "required",
            };
            serde_json::Value::String(s.to_owned())
        }
        ToolChoice::Function(func) => serde_json::json!({
            "type": "function",
            "function": {"name": func.name}
        }),
    }
}

// -- Response conversion --

/// Decode a chat-completions response, canonicalizing every assistant turn
pub fn decode_response(resp: ChatResponse, canonicalizer: &Canonicalizer) -> CompletionResponse {
    let choices = resp
        .choices
        .into_iter()
        .map(|c| {
            let turn = canonicalizer.canonicalize(AssistantTurn {
                content: c.message.content,
                tool_calls: c
                    .message
                    .tool_calls
                    .map(|calls| calls.into_iter().map(Into::into).collect())
                    .unwrap_or_default(),
                finish_reason: c.finish_reason.as_deref().and_then(parse_finish_reason),
            });

            Choice {
                index: c.index,
                message: Message {
                    role: Role::Assistant,
                    content: turn.content,
                    name: None,
                    tool_calls: turn.tool_calls,
                    tool_call_id: None,
                },
                finish_reason: turn.finish_reason,
            }
        })
        .collect();

    CompletionResponse {
        id: resp.id,
        created: resp.created,
        model: resp.model,
        choices,
        usage: resp.usage.map(Into::into),
    }
}

impl From<CompletionResponse> for ChatResponse {
    fn from(resp: CompletionResponse) -> Self {
        Self {
            id: resp.id,
            object: "chat.completion".to_owned(),
            created: resp.created,
            model: resp.model,
            choices: resp.choices.into_iter().map(Into::into).collect(),
            usage: resp.usage.map(Into::into),
        }
    }
}

impl From<Choice> for ChatChoice {
    fn from(choice: Choice) -> Self {
        Self {
            index: choice.index,
            message: ChatChoiceMessage {
                role: "assistant".to_owned(),
                content: choice.message.content,
                tool_calls: if choice.message.tool_calls.is_empty() {
                    None
                } else {
                    Some(choice.message.tool_calls.iter().map(chat_tool_call).collect())
                },
            },
            finish_reason: choice.finish_reason.map(|fr| finish_reason_str(fr).to_owned()),
        }
    }
}

impl From<ChatUsage> for Usage {
    fn from(usage: ChatUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

impl From<Usage> for ChatUsage {
    fn from(usage: Usage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// Parse a finish reason string, accepting both protocol families
pub(crate) fn parse_finish_reason(s: &str) -> Option<FinishReason> {
    match s {
        "stop" | "end_turn" => Some(FinishReason::Stop),
        "length" | "max_tokens" => Some(FinishReason::Length),
        "tool_calls" | "tool_use" => Some(FinishReason::ToolCalls),
        "content_filter" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

pub(crate) const fn finish_reason_str(fr: FinishReason) -> &'static str {
    match fr {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
    }
}

// -- Stream decoding --

/// Stateful decoder turning chat-completions stream chunks into canonical
/// events
///
/// Tracks the currently open tool call by its array index, synthesizes
/// `ToolCallArgsDone` boundaries (the chat grammar closes calls only
/// implicitly), and defers `Completion` to [`Self::finish`] so that a
/// trailing usage-only chunk can still be folded in.
#[derive(Debug, Default)]
pub struct ChatStreamDecoder {
    role_sent: bool,
    open: Option<OpenStreamCall>,
    pending_finish: Option<FinishReason>,
    usage: Option<Usage>,
    finished: bool,
}

#[derive(Debug)]
struct OpenStreamCall {
    index: u32,
    id: String,
}

impl ChatStreamDecoder {
    /// Create a fresh decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one stream chunk into canonical events
    pub fn decode_chunk(&mut self, chunk: &ChatStreamChunk) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();

        if let Some(usage) = &chunk.usage {
            self.usage = Some(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }

        for choice in &chunk.choices {
            if choice.delta.role.is_some() {
                self.ensure_role(&mut events);
            }

            if let Some(content) = &choice.delta.content
                && !content.is_empty()
            {
                self.ensure_role(&mut events);
                events.push(CanonicalEvent::ContentDelta { text: content.clone() });
            }

            for tc in choice.delta.tool_calls.as_deref().unwrap_or_default() {
                self.ensure_role(&mut events);

                let starts_new = self.open.as_ref().is_none_or(|open| open.index != tc.index);
                if starts_new {
                    self.close_open(&mut events);

                    let id = tc.id.clone().unwrap_or_else(generate_call_id);
                    let name = tc
                        .function
                        .as_ref()
                        .and_then(|f| f.name.clone())
                        .unwrap_or_default();
                    if name.is_empty() {
                        tracing::warn!(index = tc.index, "tool call started without a name");
                    }

                    events.push(CanonicalEvent::ToolCallStart {
                        id: id.clone(),
                        name,
                    });
                    self.open = Some(OpenStreamCall { index: tc.index, id });
                }

                if let Some(fragment) = tc.function.as_ref().and_then(|f| f.arguments.clone())
                    && !fragment.is_empty()
                    && let Some(open) = &self.open
                {
                    events.push(CanonicalEvent::ToolCallArgsDelta {
                        id: open.id.clone(),
                        fragment,
                    });
                }
            }

            if let Some(reason) = &choice.finish_reason {
                self.close_open(&mut events);
                self.pending_finish = parse_finish_reason(reason);
            }
        }

        events
    }

    /// Flush the terminal `Completion` event
    ///
    /// Called when the transport sees the end of the stream.
    pub fn finish(&mut self) -> Vec<CanonicalEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        self.close_open(&mut events);
        events.push(CanonicalEvent::Completion {
            finish_reason: self.pending_finish.unwrap_or(FinishReason::Stop),
            usage: self.usage,
        });
        events
    }

    /// Map a transport failure to a canonical error event
    pub fn fail(&mut self, message: impl Into<String>) -> Vec<CanonicalEvent> {
        self.finished = true;
        vec![CanonicalEvent::Error {
            kind: ErrorKind::Upstream,
            message: message.into(),
        }]
    }

    fn ensure_role(&mut self, events: &mut Vec<CanonicalEvent>) {
        if !self.role_sent {
            self.role_sent = true;
            events.push(CanonicalEvent::RoleStart);
        }
    }

    fn close_open(&mut self, events: &mut Vec<CanonicalEvent>) {
        if let Some(open) = self.open.take() {
            events.push(CanonicalEvent::ToolCallArgsDone { id: open.id });
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::chat::{ChatStreamChoice, ChatStreamDelta, ChatStreamFunctionCall, ChatStreamToolCall};

    use super::*;

    fn chunk(delta: ChatStreamDelta, finish_reason: Option<&str>) -> ChatStreamChunk {
        ChatStreamChunk {
            id: "chatcmpl-1".to_owned(),
            object: "chat.completion.chunk".to_owned(),
            created: 0,
            model: "m".to_owned(),
            choices: vec![ChatStreamChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(ToOwned::to_owned),
            }],
            usage: None,
        }
    }

    fn tool_delta(index: u32, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> ChatStreamDelta {
        ChatStreamDelta {
            role: None,
            content: None,
            tool_calls: Some(vec![ChatStreamToolCall {
                index,
                id: id.map(ToOwned::to_owned),
                tool_type: id.map(|_| "function".to_owned()),
                function: Some(ChatStreamFunctionCall {
                    name: name.map(ToOwned::to_owned),
                    arguments: args.map(ToOwned::to_owned),
                }),
            }]),
        }
    }

    #[test]
    fn tool_call_stream_produces_ordered_events() {
        let mut decoder = ChatStreamDecoder::new();
        let mut events = Vec::new();

        events.extend(decoder.decode_chunk(&chunk(tool_delta(0, Some("call_9"), Some("foo"), None), None)));
        events.extend(decoder.decode_chunk(&chunk(tool_delta(0, None, None, Some("{\"a\":")), None)));
        events.extend(decoder.decode_chunk(&chunk(tool_delta(0, None, None, Some("1}")), None)));
        events.extend(decoder.decode_chunk(&chunk(ChatStreamDelta::default(), Some("tool_calls"))));
        events.extend(decoder.finish());

        assert_eq!(
            events,
            vec![
                CanonicalEvent::RoleStart,
                CanonicalEvent::ToolCallStart {
                    id: "call_9".to_owned(),
                    name: "foo".to_owned()
                },
                CanonicalEvent::ToolCallArgsDelta {
                    id: "call_9".to_owned(),
                    fragment: "{\"a\":".to_owned()
                },
                CanonicalEvent::ToolCallArgsDelta {
                    id: "call_9".to_owned(),
                    fragment: "1}".to_owned()
                },
                CanonicalEvent::ToolCallArgsDone { id: "call_9".to_owned() },
                CanonicalEvent::Completion {
                    finish_reason: FinishReason::ToolCalls,
                    usage: None
                },
            ]
        );
    }

    #[test]
    fn new_index_closes_previous_call() {
        let mut decoder = ChatStreamDecoder::new();
        let mut events = Vec::new();

        events.extend(decoder.decode_chunk(&chunk(tool_delta(0, Some("call_a"), Some("first"), None), None)));
        events.extend(decoder.decode_chunk(&chunk(tool_delta(1, Some("call_b"), Some("second"), None), None)));

        let done_positions: Vec<_> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, CanonicalEvent::ToolCallArgsDone { .. }))
            .map(|(i, _)| i)
            .collect();
        let second_start = events
            .iter()
            .position(|e| matches!(e, CanonicalEvent::ToolCallStart { id, .. } if id == "call_b"))
            .unwrap();

        assert_eq!(done_positions.len(), 1);
        assert!(done_positions[0] < second_start);
    }

    #[test]
    fn usage_chunk_is_folded_into_completion() {
        let mut decoder = ChatStreamDecoder::new();
        decoder.decode_chunk(&chunk(
            ChatStreamDelta {
                content: Some("hi".to_owned()),
                ..ChatStreamDelta::default()
            },
            Some("stop"),
        ));
        decoder.decode_chunk(&ChatStreamChunk {
            id: "chatcmpl-1".to_owned(),
            object: "chat.completion.chunk".to_owned(),
            created: 0,
            model: "m".to_owned(),
            choices: vec![],
            usage: Some(ChatUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        });

        let events = decoder.finish();
        assert_eq!(
            events,
            vec![CanonicalEvent::Completion {
                finish_reason: FinishReason::Stop,
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15
                }),
            }]
        );
    }

    #[test]
    fn finish_is_idempotent() {
        let mut decoder = ChatStreamDecoder::new();
        assert_eq!(decoder.finish().len(), 1);
        assert!(decoder.finish().is_empty());
    }
}

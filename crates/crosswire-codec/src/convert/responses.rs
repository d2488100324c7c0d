//! Conversion between canonical types and the responses wire format

use crosswire_core::{
    CanonicalEvent, Choice, CompletionParams, CompletionRequest, CompletionResponse, ErrorKind, FinishReason, Message,
    Role, ToolCall, ToolChoice, ToolChoiceFunction, ToolChoiceMode, ToolDefinition, Usage,
};

use crate::canonical::{AssistantTurn, Canonicalizer};
use crate::protocol::responses::{
    ResponsesFunctionDecl, ResponsesInput, ResponsesInputItem, ResponsesMessageContent, ResponsesOutputItem,
    ResponsesOutputText, ResponsesRequest, ResponsesResponse, ResponsesRoleMessage, ResponsesStreamEvent,
    ResponsesToolDecl, ResponsesUsage,
};

// -- Inbound: responses wire format -> canonical types --

impl From<ResponsesRequest> for CompletionRequest {
    fn from(req: ResponsesRequest) -> Self {
        let mut messages: Vec<Message> = Vec::new();

        if let Some(instructions) = req.instructions {
            messages.push(Message::text(Role::System, instructions));
        }

        match req.input {
            ResponsesInput::Text(text) => messages.push(Message::text(Role::User, text)),
            ResponsesInput::Items(items) => {
                for item in items {
                    messages.push(input_item_to_canonical(item));
                }
            }
        }

        Self {
            model: req.model,
            messages,
            params: CompletionParams {
                temperature: req.temperature,
                top_p: req.top_p,
                max_tokens: req.max_output_tokens,
                stop: None,
            },
            tools: req.tools.map(|tools| tools.into_iter().map(Into::into).collect()),
            tool_choice: req.tool_choice.and_then(|v| parse_responses_tool_choice(&v)),
            stream: req.stream.unwrap_or(false),
        }
    }
}

fn input_item_to_canonical(item: ResponsesInputItem) -> Message {
    match item {
        ResponsesInputItem::FunctionCall {
            call_id, name, arguments, ..
        } => Message::with_tool_calls(vec![ToolCall::new(call_id, name, arguments)]),
        ResponsesInputItem::FunctionCallOutput { call_id, output } => Message::tool_result(call_id, output),
        ResponsesInputItem::Message(msg) => {
            let role = match msg.role.as_str() {
                // "developer" is this protocol's spelling of system
                "system" | "developer" => Role::System,
                "assistant" => Role::Assistant,
                _ => Role::User,
            };
            Message::text(role, msg.content.as_text())
        }
    }
}

impl From<ResponsesToolDecl> for ToolDefinition {
    fn from(decl: ResponsesToolDecl) -> Self {
        let function = match decl {
            ResponsesToolDecl::Wrapped { function, .. } | ResponsesToolDecl::Flat(function) => function,
        };
        Self::function(function.name, function.description, function.parameters)
    }
}

fn parse_responses_tool_choice(value: &serde_json::Value) -> Option<ToolChoice> {
    match value {
        serde_json::Value::String(s) => match s.as_str() {
            "none" => Some(ToolChoice::Mode(ToolChoiceMode::None)),
            "auto" => Some(ToolChoice::Mode(ToolChoiceMode::Auto)),
            "required" => Some(ToolChoice::Mode(ToolChoiceMode::Required)),
            _ => None,
        },
        // `{type: "function", name}` in this grammar
        serde_json::Value::Object(map) => map
            .get("name")
            .and_then(serde_json::Value::as_str)
            .map(|name| ToolChoice::Function(ToolChoiceFunction { name: name.to_owned() })),
        _ => None,
    }
}

// -- Outbound: canonical types -> responses wire format --

impl From<&CompletionRequest> for ResponsesRequest {
    fn from(req: &CompletionRequest) -> Self {
        let mut instructions = None;
        let mut items: Vec<ResponsesInputItem> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => instructions = msg.content.clone(),
                Role::Tool => {
                    items.push(ResponsesInputItem::FunctionCallOutput {
                        call_id: msg.tool_call_id.clone().unwrap_or_default(),
                        output: msg.content.clone().unwrap_or_default(),
                    });
                }
                Role::Assistant if !msg.tool_calls.is_empty() => {
                    for tc in &msg.tool_calls {
                        items.push(ResponsesInputItem::FunctionCall {
                            call_id: tc.id.clone(),
                            name: tc.function.name.clone(),
                            arguments: tc.function.arguments.clone(),
                            id: None,
                        });
                    }
                }
                Role::Assistant | Role::User => {
                    items.push(ResponsesInputItem::Message(ResponsesRoleMessage {
                        role: if msg.role == Role::Assistant { "assistant" } else { "user" }.to_owned(),
                        content: ResponsesMessageContent::Text(msg.content.clone().unwrap_or_default()),
                    }));
                }
            }
        }

        let tools = req.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| {
                    ResponsesToolDecl::Flat(ResponsesFunctionDecl {
                        tool_type: "function".to_owned(),
                        name: t.function.name.clone(),
                        description: t.function.description.clone(),
                        parameters: t.function.parameters.clone(),
                    })
                })
                .collect()
        });

        Self {
            model: req.model.clone(),
            input: ResponsesInput::Items(items),
            instructions,
            max_output_tokens: req.params.max_tokens,
            temperature: req.params.temperature,
            top_p: req.params.top_p,
            stream: if req.stream { Some(true) } else { None },
            tools,
            tool_choice: req.tool_choice.as_ref().map(tool_choice_to_responses_value),
        }
    }
}

fn tool_choice_to_responses_value(choice: &ToolChoice) -> serde_json::Value {
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
            "name": func.name
        }),
    }
}

// -- Response conversion --

/// Decode a responses-protocol response, canonicalizing the assistant turn
pub fn decode_response(resp: ResponsesResponse, canonicalizer: &Canonicalizer) -> CompletionResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for item in resp.output {
        match item {
            ResponsesOutputItem::Message { content, .. } => {
                for part in content {
                    text.push_str(&part.text);
                }
            }
            ResponsesOutputItem::FunctionCall {
                call_id, name, arguments, ..
            } => {
                tool_calls.push(ToolCall::new(call_id, name, arguments));
            }
        }
    }

    let finish_reason = match resp.status.as_str() {
        "incomplete" => Some(FinishReason::Length),
        _ if !tool_calls.is_empty() => Some(FinishReason::ToolCalls),
        _ => Some(FinishReason::Stop),
    };

    let turn = canonicalizer.canonicalize(AssistantTurn {
        content: if text.is_empty() { None } else { Some(text) },
        tool_calls,
        finish_reason,
    });

    CompletionResponse {
        id: resp.id,
        created: resp.created_at,
        model: resp.model,
        choices: vec![Choice {
            index: 0,
            message: Message {
                role: Role::Assistant,
                content: turn.content,
                name: None,
                tool_calls: turn.tool_calls,
                tool_call_id: None,
            },
            finish_reason: turn.finish_reason,
        }],
        usage: resp.usage.map(Into::into),
    }
}

impl From<CompletionResponse> for ResponsesResponse {
    fn from(resp: CompletionResponse) -> Self {
        let choice = resp.choices.into_iter().next();

        let mut output = Vec::new();
        let mut status = "completed";

        if let Some(c) = &choice {
            if let Some(text) = &c.message.content {
                output.push(ResponsesOutputItem::Message {
                    id: format!("msg_{}", resp.id),
                    role: "assistant".to_owned(),
                    content: vec![ResponsesOutputText {
                        part_type: "output_text".to_owned(),
                        text: text.clone(),
                    }],
                });
            }
            for tc in &c.message.tool_calls {
                output.push(ResponsesOutputItem::FunctionCall {
                    id: tc.id.clone(),
                    call_id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    arguments: tc.function.arguments.clone(),
                    status: Some("completed".to_owned()),
                });
            }
            if c.finish_reason == Some(FinishReason::Length) {
                status = "incomplete";
            }
        }

        Self {
            id: resp.id,
            object: "response".to_owned(),
            created_at: resp.created,
            status: status.to_owned(),
            model: resp.model,
            output,
            usage: resp.usage.map(Into::into),
        }
    }
}

impl From<ResponsesUsage> for Usage {
    fn from(usage: ResponsesUsage) -> Self {
        Self {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

impl From<Usage> for ResponsesUsage {
    fn from(usage: Usage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

// -- Stream decoding --

/// Stateful decoder turning responses-protocol stream events into
/// canonical events
///
/// Tracks open function-call items by `item_id` so argument deltas can be
/// correlated with the `call_id` the canonical layer uses.
#[derive(Debug, Default)]
pub struct ResponsesStreamDecoder {
    open_call: Option<OpenItem>,
    finished: bool,
}

#[derive(Debug)]
struct OpenItem {
    item_id: String,
    call_id: String,
}

impl ResponsesStreamDecoder {
    /// Create a fresh decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one stream event into canonical events
    pub fn decode_event(&mut self, event: &ResponsesStreamEvent) -> Vec<CanonicalEvent> {
        match event {
            ResponsesStreamEvent::Created { .. } => vec![CanonicalEvent::RoleStart],

            ResponsesStreamEvent::OutputItemAdded { item, .. } => match item {
                ResponsesOutputItem::Message { .. } => Vec::new(),
                ResponsesOutputItem::FunctionCall {
                    id,
                    call_id,
                    name,
                    arguments,
                    ..
                } => {
                    self.open_call = Some(OpenItem {
                        item_id: id.clone(),
                        call_id: call_id.clone(),
                    });
                    let mut events = vec![CanonicalEvent::ToolCallStart {
                        id: call_id.clone(),
                        name: name.clone(),
                    }];
                    if !arguments.is_empty() {
                        events.push(CanonicalEvent::ToolCallArgsDelta {
                            id: call_id.clone(),
                            fragment: arguments.clone(),
                        });
                    }
                    events
                }
            },

            ResponsesStreamEvent::OutputTextDelta { delta, .. } => {
                vec![CanonicalEvent::ContentDelta { text: delta.clone() }]
            }

            ResponsesStreamEvent::FunctionCallArgumentsDelta { item_id, delta, .. } => self
                .open_call
                .as_ref()
                .filter(|open| open.item_id == *item_id)
                .map_or_else(Vec::new, |open| {
                    vec![CanonicalEvent::ToolCallArgsDelta {
                        id: open.call_id.clone(),
                        fragment: delta.clone(),
                    }]
                }),

            ResponsesStreamEvent::FunctionCallArgumentsDone { item_id, .. } => self.close_item(item_id),

            ResponsesStreamEvent::OutputItemDone { item, .. } => match item {
                ResponsesOutputItem::FunctionCall { id, .. } => self.close_item(id),
                ResponsesOutputItem::Message { .. } => Vec::new(),
            },

            ResponsesStreamEvent::Completed { response } => {
                self.finished = true;
                let has_calls = response
                    .output
                    .iter()
                    .any(|item| matches!(item, ResponsesOutputItem::FunctionCall { .. }));
                vec![CanonicalEvent::Completion {
                    finish_reason: if has_calls { FinishReason::ToolCalls } else { FinishReason::Stop },
                    usage: response.usage.map(Into::into),
                }]
            }

            ResponsesStreamEvent::Error { message, .. } => {
                self.finished = true;
                vec![CanonicalEvent::Error {
                    kind: ErrorKind::Upstream,
                    message: message.clone(),
                }]
            }

            ResponsesStreamEvent::Unknown => Vec::new(),
        }
    }

    /// Flush the terminal `Completion` event if the backend never sent one
    pub fn finish(&mut self) -> Vec<CanonicalEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        if let Some(open) = self.open_call.take() {
            events.push(CanonicalEvent::ToolCallArgsDone { id: open.call_id });
        }
        events.push(CanonicalEvent::Completion {
            finish_reason: FinishReason::Stop,
            usage: None,
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

    fn close_item(&mut self, item_id: &str) -> Vec<CanonicalEvent> {
        match self.open_call.take() {
            Some(open) if open.item_id == item_id => {
                vec![CanonicalEvent::ToolCallArgsDone { id: open.call_id }]
            }
            other => {
                self.open_call = other;
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function_call_item(arguments: &str) -> ResponsesOutputItem {
        ResponsesOutputItem::FunctionCall {
            id: "item_1".to_owned(),
            call_id: "call_1".to_owned(),
            name: "foo".to_owned(),
            arguments: arguments.to_owned(),
            status: None,
        }
    }

    #[test]
    fn function_call_stream_produces_ordered_events() {
        let mut decoder = ResponsesStreamDecoder::new();
        let mut events = Vec::new();

        events.extend(decoder.decode_event(&ResponsesStreamEvent::OutputItemAdded {
            output_index: 0,
            item: function_call_item(""),
        }));
        events.extend(decoder.decode_event(&ResponsesStreamEvent::FunctionCallArgumentsDelta {
            item_id: "item_1".to_owned(),
            output_index: 0,
            delta: "{\"a\":1}".to_owned(),
        }));
        events.extend(decoder.decode_event(&ResponsesStreamEvent::FunctionCallArgumentsDone {
            item_id: "item_1".to_owned(),
            output_index: 0,
            arguments: "{\"a\":1}".to_owned(),
        }));

        assert_eq!(
            events,
            vec![
                CanonicalEvent::ToolCallStart {
                    id: "call_1".to_owned(),
                    name: "foo".to_owned()
                },
                CanonicalEvent::ToolCallArgsDelta {
                    id: "call_1".to_owned(),
                    fragment: "{\"a\":1}".to_owned()
                },
                CanonicalEvent::ToolCallArgsDone {
                    id: "call_1".to_owned()
                },
            ]
        );
    }

    #[test]
    fn item_done_closes_without_duplicate() {
        let mut decoder = ResponsesStreamDecoder::new();
        decoder.decode_event(&ResponsesStreamEvent::OutputItemAdded {
            output_index: 0,
            item: function_call_item(""),
        });
        let first = decoder.decode_event(&ResponsesStreamEvent::FunctionCallArgumentsDone {
            item_id: "item_1".to_owned(),
            output_index: 0,
            arguments: String::new(),
        });
        let second = decoder.decode_event(&ResponsesStreamEvent::OutputItemDone {
            output_index: 0,
            item: function_call_item("{}"),
        });

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }
}

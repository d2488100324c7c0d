//! Conversion between canonical types and the messages wire format

use crosswire_core::{
    CanonicalEvent, Choice, CompletionParams, CompletionRequest, CompletionResponse, ErrorKind, FinishReason, Message,
    Role, ToolCall, ToolChoice, ToolChoiceFunction, ToolChoiceMode, ToolDefinition, Usage,
};

use crate::canonical::{AssistantTurn, Canonicalizer};
use crate::protocol::messages::{
    MessagesContent, MessagesContentBlock, MessagesFunctionDecl, MessagesMessage, MessagesRequest, MessagesResponse,
    MessagesResponseBlock, MessagesStreamContentBlock, MessagesStreamDelta, MessagesStreamEvent, MessagesToolChoice,
    MessagesToolDecl, MessagesUsage,
};

/// Default max tokens when the canonical request has none (the messages
/// protocol requires the field)
const DEFAULT_MAX_TOKENS: u32 = 4096;

// -- Inbound: messages wire format -> canonical types --

impl From<MessagesRequest> for CompletionRequest {
    fn from(req: MessagesRequest) -> Self {
        let mut messages: Vec<Message> = Vec::new();

        // The top-level system prompt becomes an in-band system message.
        if let Some(system) = req.system {
            messages.push(Message::text(Role::System, system));
        }

        for msg in req.messages {
            messages.extend(messages_message_to_canonical(msg));
        }

        Self {
            model: req.model,
            messages,
            params: CompletionParams {
                temperature: req.temperature,
                top_p: req.top_p,
                max_tokens: Some(req.max_tokens),
                stop: req.stop_sequences,
            },
            tools: req.tools.map(|tools| tools.into_iter().map(Into::into).collect()),
            tool_choice: req.tool_choice.map(|tc| messages_tool_choice_to_canonical(&tc)),
            stream: req.stream.unwrap_or(false),
        }
    }
}

/// Convert one wire message; a block list may fan out into an assistant
/// message plus tool-result messages
fn messages_message_to_canonical(msg: MessagesMessage) -> Vec<Message> {
    let role = if msg.role == "assistant" { Role::Assistant } else { Role::User };

    match msg.content {
        MessagesContent::Text(text) => vec![Message::text(role, text)],
        MessagesContent::Blocks(blocks) => {
            let mut text = String::new();
            let mut tool_calls = Vec::new();
            let mut results: Vec<Message> = Vec::new();

            for block in blocks {
                match block {
                    MessagesContentBlock::Text { text: t } => text.push_str(&t),
                    MessagesContentBlock::ToolUse { id, name, input } => {
                        let arguments = serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_owned());
                        tool_calls.push(ToolCall::new(id, name, arguments));
                    }
                    MessagesContentBlock::ToolResult {
                        tool_use_id, content, ..
                    } => {
                        results.push(Message::tool_result(tool_use_id, content.unwrap_or_default()));
                    }
                    MessagesContentBlock::Image { .. } => {
                        tracing::debug!("ignoring image block in messages request");
                    }
                }
            }

            let mut out = Vec::new();
            if !tool_calls.is_empty() {
                out.push(Message {
                    role: Role::Assistant,
                    content: None,
                    name: None,
                    tool_calls,
                    tool_call_id: None,
                });
            } else if !text.is_empty() || results.is_empty() {
                out.push(Message::text(role, text));
            }
            out.extend(results);
            out
        }
    }
}

impl From<MessagesToolDecl> for ToolDefinition {
    fn from(decl: MessagesToolDecl) -> Self {
        let function = match decl {
            MessagesToolDecl::Nested { function, .. } | MessagesToolDecl::Flat(function) => function,
        };
        Self::function(function.name, function.description, function.input_schema)
    }
}

fn messages_tool_choice_to_canonical(tc: &MessagesToolChoice) -> ToolChoice {
    match tc.choice_type.as_str() {
        "any" => ToolChoice::Mode(ToolChoiceMode::Required),
        "tool" => tc.name.as_ref().map_or(ToolChoice::Mode(ToolChoiceMode::Auto), |name| {
            ToolChoice::Function(ToolChoiceFunction { name: name.clone() })
        }),
        // "auto" and unknown types both default to Auto
        _ => ToolChoice::Mode(ToolChoiceMode::Auto),
    }
}

// -- Outbound: canonical types -> messages wire format --

impl From<&CompletionRequest> for MessagesRequest {
    fn from(req: &CompletionRequest) -> Self {
        let mut system = None;
        let mut messages = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => system = msg.content.clone(),
                _ => messages.push(canonical_message_to_messages(msg)),
            }
        }

        let tools = req.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| {
                    MessagesToolDecl::Flat(MessagesFunctionDecl {
                        name: t.function.name.clone(),
                        description: t.function.description.clone(),
                        input_schema: t.function.parameters.clone(),
                    })
                })
                .collect()
        });

        Self {
            model: req.model.clone(),
            max_tokens: req.params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            messages,
            temperature: req.params.temperature,
            top_p: req.params.top_p,
            stop_sequences: req.params.stop.clone(),
            stream: if req.stream { Some(true) } else { None },
            tools,
            tool_choice: req.tool_choice.as_ref().map(canonical_tool_choice_to_messages),
        }
    }
}

fn canonical_message_to_messages(msg: &Message) -> MessagesMessage {
    // Tool results travel as user-role tool_result blocks.
    if msg.role == Role::Tool
        && let Some(tool_call_id) = &msg.tool_call_id
    {
        return MessagesMessage {
            role: "user".to_owned(),
            content: MessagesContent::Blocks(vec![MessagesContentBlock::ToolResult {
                tool_use_id: tool_call_id.clone(),
                content: msg.content.clone(),
                is_error: None,
            }]),
        };
    }

    let role = if msg.role == Role::Assistant { "assistant" } else { "user" };

    if !msg.tool_calls.is_empty() {
        let blocks = msg
            .tool_calls
            .iter()
            .map(|tc| {
                let input =
                    serde_json::from_str(&tc.function.arguments).unwrap_or_else(|_| serde_json::json!({}));
                MessagesContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    input,
                }
            })
            .collect();
        return MessagesMessage {
            role: role.to_owned(),
            content: MessagesContent::Blocks(blocks),
        };
    }

    MessagesMessage {
        role: role.to_owned(),
        content: MessagesContent::Text(msg.content.clone().unwrap_or_default()),
    }
}

fn canonical_tool_choice_to_messages(choice: &ToolChoice) -> MessagesToolChoice {
    match choice {
        ToolChoice::Mode(mode) => match mode {
            // This protocol has no "none" mode; both map to auto.
            ToolChoiceMode::None | ToolChoiceMode::Auto => MessagesToolChoice {
                choice_type: "auto".to_owned(),
                name: None,
            },
            ToolChoiceMode::Required => MessagesToolChoice {
                choice_type: "any".to_owned(),
                name: None,
            },
        },
        ToolChoice::Function(func) => MessagesToolChoice {
            choice_type: "tool".to_owned(),
            name: Some(func.name.clone()),
        },
    }
}

// -- Response conversion --

/// Decode a messages-protocol response, canonicalizing the assistant turn
pub fn decode_response(resp: MessagesResponse, canonicalizer: &Canonicalizer) -> CompletionResponse {
    let created = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in resp.content {
        match block {
            MessagesResponseBlock::Text { text: t } => text.push_str(&t),
            MessagesResponseBlock::ToolUse { id, name, input } => {
                let arguments = serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_owned());
                tool_calls.push(ToolCall::new(id, name, arguments));
            }
        }
    }

    let turn = canonicalizer.canonicalize(AssistantTurn {
        content: if text.is_empty() { None } else { Some(text) },
        tool_calls,
        finish_reason: resp.stop_reason.as_deref().and_then(super::chat::parse_finish_reason),
    });

    CompletionResponse {
        id: resp.id,
        created,
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
        usage: Some(resp.usage.into()),
    }
}

impl From<CompletionResponse> for MessagesResponse {
    fn from(resp: CompletionResponse) -> Self {
        let choice = resp.choices.into_iter().next();

        let mut content = Vec::new();
        if let Some(c) = &choice {
            if let Some(text) = &c.message.content {
                content.push(MessagesResponseBlock::Text { text: text.clone() });
            }
            for tc in &c.message.tool_calls {
                let input =
                    serde_json::from_str(&tc.function.arguments).unwrap_or_else(|_| serde_json::json!({}));
                content.push(MessagesResponseBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    input,
                });
            }
        }

        let stop_reason = choice
            .as_ref()
            .and_then(|c| c.finish_reason)
            .map(|fr| messages_stop_reason(fr).to_owned());

        let usage = resp.usage.unwrap_or_default();

        Self {
            id: resp.id,
            response_type: "message".to_owned(),
            role: "assistant".to_owned(),
            content,
            model: resp.model,
            stop_reason,
            stop_sequence: None,
            usage: usage.into(),
        }
    }
}

impl From<MessagesUsage> for Usage {
    fn from(usage: MessagesUsage) -> Self {
        Self {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
        }
    }
}

impl From<Usage> for MessagesUsage {
    fn from(usage: Usage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

pub(crate) const fn messages_stop_reason(fr: FinishReason) -> &'static str {
    match fr {
        // No content_filter reason exists in this grammar; map to end_turn.
        FinishReason::Stop | FinishReason::ContentFilter => "end_turn",
        FinishReason::Length => "max_tokens",
        FinishReason::ToolCalls => "tool_use",
    }
}

// -- Stream decoding --

/// Stateful decoder turning messages-protocol stream events into
/// canonical events
///
/// The block index is shared across text and tool_use blocks, so the
/// decoder tracks the currently open tool call by id rather than index.
#[derive(Debug, Default)]
pub struct MessagesStreamDecoder {
    open_tool: Option<String>,
    pending_finish: Option<FinishReason>,
    usage: Option<Usage>,
    finished: bool,
}

impl MessagesStreamDecoder {
    /// Create a fresh decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one stream event into canonical events
    pub fn decode_event(&mut self, event: &MessagesStreamEvent) -> Vec<CanonicalEvent> {
        match event {
            MessagesStreamEvent::MessageStart { .. } => vec![CanonicalEvent::RoleStart],
            MessagesStreamEvent::Ping => Vec::new(),

            MessagesStreamEvent::ContentBlockStart { content_block, .. } => match content_block {
                MessagesStreamContentBlock::Text { .. } => Vec::new(),
                MessagesStreamContentBlock::ToolUse { id, name, .. } => {
                    self.open_tool = Some(id.clone());
                    vec![CanonicalEvent::ToolCallStart {
                        id: id.clone(),
                        name: name.clone(),
                    }]
                }
            },

            MessagesStreamEvent::ContentBlockDelta { delta, .. } => match delta {
                MessagesStreamDelta::TextDelta { text } => {
                    vec![CanonicalEvent::ContentDelta { text: text.clone() }]
                }
                MessagesStreamDelta::InputJsonDelta { partial_json } => {
                    self.open_tool.as_ref().map_or_else(Vec::new, |id| {
                        vec![CanonicalEvent::ToolCallArgsDelta {
                            id: id.clone(),
                            fragment: partial_json.clone(),
                        }]
                    })
                }
            },

            MessagesStreamEvent::ContentBlockStop { .. } => self
                .open_tool
                .take()
                .map_or_else(Vec::new, |id| vec![CanonicalEvent::ToolCallArgsDone { id }]),

            MessagesStreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason.as_deref() {
                    self.pending_finish = super::chat::parse_finish_reason(reason);
                }
                if let Some(usage) = usage {
                    self.usage = Some((*usage).into());
                }
                Vec::new()
            }

            MessagesStreamEvent::MessageStop => self.finish(),

            MessagesStreamEvent::Error { error } => {
                self.finished = true;
                vec![CanonicalEvent::Error {
                    kind: ErrorKind::Upstream,
                    message: error.message.clone(),
                }]
            }
        }
    }

    /// Flush the terminal `Completion` event
    pub fn finish(&mut self) -> Vec<CanonicalEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        if let Some(id) = self.open_tool.take() {
            events.push(CanonicalEvent::ToolCallArgsDone { id });
        }
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
}

#[cfg(test)]
mod tests {
    use crate::protocol::messages::MessagesMessageDelta;

    use super::*;

    #[test]
    fn tool_use_stream_produces_ordered_events() {
        let mut decoder = MessagesStreamDecoder::new();
        let mut events = Vec::new();

        events.extend(decoder.decode_event(&MessagesStreamEvent::MessageStart {
            message: crate::protocol::messages::MessagesStreamMessage {
                id: "msg_1".to_owned(),
                message_type: "message".to_owned(),
                role: "assistant".to_owned(),
                model: "m".to_owned(),
                usage: None,
            },
        }));
        events.extend(decoder.decode_event(&MessagesStreamEvent::ContentBlockStart {
            index: 0,
            content_block: MessagesStreamContentBlock::ToolUse {
                id: "toolu_1".to_owned(),
                name: "foo".to_owned(),
                input: serde_json::json!({}),
            },
        }));
        events.extend(decoder.decode_event(&MessagesStreamEvent::ContentBlockDelta {
            index: 0,
            delta: MessagesStreamDelta::InputJsonDelta {
                partial_json: "{\"a\":1}".to_owned(),
            },
        }));
        events.extend(decoder.decode_event(&MessagesStreamEvent::ContentBlockStop { index: 0 }));
        events.extend(decoder.decode_event(&MessagesStreamEvent::MessageDelta {
            delta: MessagesMessageDelta {
                stop_reason: Some("tool_use".to_owned()),
                stop_sequence: None,
            },
            usage: None,
        }));
        events.extend(decoder.decode_event(&MessagesStreamEvent::MessageStop));

        assert_eq!(
            events,
            vec![
                CanonicalEvent::RoleStart,
                CanonicalEvent::ToolCallStart {
                    id: "toolu_1".to_owned(),
                    name: "foo".to_owned()
                },
                CanonicalEvent::ToolCallArgsDelta {
                    id: "toolu_1".to_owned(),
                    fragment: "{\"a\":1}".to_owned()
                },
                CanonicalEvent::ToolCallArgsDone {
                    id: "toolu_1".to_owned()
                },
                CanonicalEvent::Completion {
                    finish_reason: FinishReason::ToolCalls,
                    usage: None
                },
            ]
        );
    }

    #[test]
    fn text_block_stop_emits_no_done() {
        let mut decoder = MessagesStreamDecoder::new();
        decoder.decode_event(&MessagesStreamEvent::ContentBlockStart {
            index: 0,
            content_block: MessagesStreamContentBlock::Text { text: String::new() },
        });
        let events = decoder.decode_event(&MessagesStreamEvent::ContentBlockStop { index: 0 });
        assert!(events.is_empty());
    }
}

//! Backend response canonicalization across protocols: structured tool
//! calls, free-text tool intent, argument repair, and the tool-call
//! pairing invariant.

use std::sync::Arc;

use crosswire_codec::{Canonicalizer, Codec, Protocol};
use crosswire_core::{FinishReason, SchemaRegistry};
use serde_json::json;

fn canonicalizer() -> Canonicalizer {
    Canonicalizer::new(Arc::new(SchemaRegistry::default()))
}

fn assert_invariants(response: &crosswire_core::CompletionResponse) {
    for choice in &response.choices {
        let msg = &choice.message;
        assert!(msg.tool_call_invariant_holds());
        if !msg.tool_calls.is_empty() {
            assert_eq!(msg.content, None, "tool-call turns carry no content");
            assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
        }
        for call in &msg.tool_calls {
            serde_json::from_str::<serde_json::Value>(&call.function.arguments)
                .expect("arguments always parse");
        }
    }
}

#[test]
fn chat_backend_with_structured_calls() {
    let response = Codec::for_protocol(Protocol::ChatCompletions)
        .decode_response(
            json!({
                "id": "chatcmpl-1", "object": "chat.completion", "created": 1, "model": "m",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1", "type": "function",
                            "function": {"name": "get_weather", "arguments": "{city: 'Paris',}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": {"prompt_tokens": 3, "completion_tokens": 5, "total_tokens": 8}
            }),
            &canonicalizer(),
        )
        .unwrap();

    assert_invariants(&response);
    let call = &response.choices[0].message.tool_calls[0];
    // Malformed arguments were repaired, not dropped.
    assert_eq!(call.function.arguments, r#"{"city":"Paris"}"#);
    assert_eq!(response.usage.unwrap().total_tokens, 8);
}

#[test]
fn chat_backend_with_free_text_tool_call() {
    let response = Codec::for_protocol(Protocol::ChatCompletions)
        .decode_response(
            json!({
                "id": "chatcmpl-1", "object": "chat.completion", "created": 1, "model": "m",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": "I'll check. <tool_call>{\"name\":\"get_weather\",\"arguments\":{\"city\":\"Paris\"}}</tool_call>"
                    },
                    "finish_reason": "stop"
                }]
            }),
            &canonicalizer(),
        )
        .unwrap();

    assert_invariants(&response);
    let msg = &response.choices[0].message;
    assert_eq!(msg.tool_calls.len(), 1);
    assert_eq!(msg.tool_calls[0].function.name, "get_weather");
    assert_eq!(msg.tool_calls[0].function.arguments, r#"{"city":"Paris"}"#);
}

#[test]
fn messages_backend_with_tool_use_blocks() {
    let response = Codec::for_protocol(Protocol::Messages)
        .decode_response(
            json!({
                "id": "msg_1", "type": "message", "role": "assistant", "model": "m",
                "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather",
                     "input": {"city": "Paris"}}
                ],
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 3, "output_tokens": 5}
            }),
            &canonicalizer(),
        )
        .unwrap();

    assert_invariants(&response);
    assert_eq!(response.choices[0].message.tool_calls[0].id, "toolu_1");
}

#[test]
fn responses_backend_with_function_call_items() {
    let response = Codec::for_protocol(Protocol::Responses)
        .decode_response(
            json!({
                "id": "resp_1", "object": "response", "created_at": 1, "status": "completed",
                "model": "m",
                "output": [
                    {"type": "function_call", "id": "item_1", "call_id": "call_1",
                     "name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}
                ],
                "usage": {"input_tokens": 3, "output_tokens": 5, "total_tokens": 8}
            }),
            &canonicalizer(),
        )
        .unwrap();

    assert_invariants(&response);
    assert_eq!(response.choices[0].message.tool_calls[0].id, "call_1");
}

#[test]
fn adjacent_duplicates_collapse_non_adjacent_survive() {
    let response = Codec::for_protocol(Protocol::ChatCompletions)
        .decode_response(
            json!({
                "id": "chatcmpl-1", "object": "chat.completion", "created": 1, "model": "m",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [
                            {"id": "a", "type": "function", "function": {"name": "ping", "arguments": "{}"}},
                            {"id": "b", "type": "function", "function": {"name": "ping", "arguments": "{}"}},
                            {"id": "c", "type": "function", "function": {"name": "other", "arguments": "{}"}},
                            {"id": "d", "type": "function", "function": {"name": "ping", "arguments": "{}"}}
                        ]
                    },
                    "finish_reason": "tool_calls"
                }]
            }),
            &canonicalizer(),
        )
        .unwrap();

    let names: Vec<_> = response.choices[0]
        .message
        .tool_calls
        .iter()
        .map(|c| c.function.name.as_str())
        .collect();
    assert_eq!(names, vec!["ping", "other", "ping"]);
}

#[test]
fn irreparable_arguments_survive_as_empty_object() {
    let response = Codec::for_protocol(Protocol::ChatCompletions)
        .decode_response(
            json!({
                "id": "chatcmpl-1", "object": "chat.completion", "created": 1, "model": "m",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1", "type": "function",
                            "function": {"name": "lookup", "arguments": "not json at all {{{"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            }),
            &canonicalizer(),
        )
        .unwrap();

    assert_invariants(&response);
    assert_eq!(response.choices[0].message.tool_calls[0].function.arguments, "{}");
}

#[test]
fn canonical_response_encodes_for_every_protocol() {
    let chat = Codec::for_protocol(Protocol::ChatCompletions);
    let canonical = chat
        .decode_response(
            json!({
                "id": "chatcmpl-1", "object": "chat.completion", "created": 7, "model": "m",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1", "type": "function",
                            "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            }),
            &canonicalizer(),
        )
        .unwrap();

    let messages_body = Codec::for_protocol(Protocol::Messages).encode_response(canonical.clone());
    assert_eq!(
        messages_body.get("stop_reason").and_then(serde_json::Value::as_str),
        Some("tool_use")
    );
    assert_eq!(
        messages_body.pointer("/content/0/type").and_then(serde_json::Value::as_str),
        Some("tool_use")
    );

    let responses_body = Codec::for_protocol(Protocol::Responses).encode_response(canonical.clone());
    assert_eq!(
        responses_body.pointer("/output/0/type").and_then(serde_json::Value::as_str),
        Some("function_call")
    );

    let chat_body = chat.encode_response(canonical);
    assert_eq!(
        chat_body.pointer("/choices/0/finish_reason").and_then(serde_json::Value::as_str),
        Some("tool_calls")
    );
    assert!(chat_body.pointer("/choices/0/message/content").is_none_or(|v| v.is_null()));
}

#[test]
fn registry_config_flows_into_canonicalization() {
    use crosswire_config::Config;
    use indoc::indoc;

    let config = Config::from_toml_str(indoc! {r#"
        [[tools]]
        name = "get_weather"
        description = "Look up weather"
        [tools.parameters]
        type = "object"
        required = ["city"]
    "#})
    .unwrap();

    let registry = SchemaRegistry::from_config(&config.tools);
    assert!(registry.contains("get_weather"));

    // A call missing its required parameter is kept (advisory validation).
    let canon = Canonicalizer::new(Arc::new(registry));
    let response = Codec::for_protocol(Protocol::ChatCompletions)
        .decode_response(
            json!({
                "id": "chatcmpl-1", "object": "chat.completion", "created": 1, "model": "m",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1", "type": "function",
                            "function": {"name": "get_weather", "arguments": "{}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            }),
            &canon,
        )
        .unwrap();

    assert_eq!(response.choices[0].message.tool_calls.len(), 1);
}

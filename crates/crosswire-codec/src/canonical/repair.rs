//! Best-effort repair of malformed tool-call argument payloads
//!
//! Backends routinely emit argument blobs that are almost JSON: single
//! quotes, unquoted keys, trailing commas, Python literals, or truncated
//! output. [`repair`] coerces any input into a syntactically valid
//! JSON-encoded string, degrading to `"{}"` when nothing can be salvaged.

use serde_json::Value;

/// The canonical empty-object fallback
pub const EMPTY_OBJECT: &str = "{}";

/// Coerce a raw argument blob into a valid JSON-encoded string
///
/// Strategy, each stage tried only if the previous failed:
/// 1. strict parse — input returned unchanged;
/// 2. lenient parse tolerating single quotes, unquoted keys, trailing
///    commas, and Python literals;
/// 3. structural repair — balance braces/brackets and close dangling
///    strings;
/// 4. the empty object.
///
/// Never panics and never returns unparsable output.
pub fn repair(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return EMPTY_OBJECT.to_owned();
    }

    if serde_json::from_str::<Value>(trimmed).is_ok() {
        return trimmed.to_owned();
    }

    if let Some(value) = lenient_parse(trimmed) {
        return serialize(&value);
    }

    if let Some(value) = structural_repair(trimmed) {
        return serialize(&value);
    }

    tracing::warn!(len = raw.len(), "argument payload beyond repair, degrading to empty object");
    EMPTY_OBJECT.to_owned()
}

/// Closing tokens that make a streamed argument prefix parse as JSON
///
/// Given the concatenation of fragments forwarded so far, returns the
/// shortest suffix such that `partial + suffix` is valid JSON, or `None`
/// when the prefix is not a salvageable JSON prefix at all.
pub fn completion_suffix(partial: &str) -> Option<String> {
    let trimmed = partial.trim_end();
    if trimmed.is_empty() {
        return Some(EMPTY_OBJECT.to_owned());
    }
    if serde_json::from_str::<Value>(trimmed).is_ok() {
        return Some(String::new());
    }

    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in trimmed.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
            }
            _ => {}
        }
    }

    let mut closers = String::new();
    if in_string {
        closers.push('"');
    }
    while let Some(close) = stack.pop() {
        closers.push(close);
    }

    // A dangling `:` or `,` needs a filler value before the closers.
    let candidates = [
        closers.clone(),
        format!("null{closers}"),
        format!(":null{closers}"),
        format!("\"\":null{closers}"),
    ];

    candidates.into_iter().find(|suffix| {
        let candidate = format!("{trimmed}{suffix}");
        serde_json::from_str::<Value>(&candidate).is_ok()
    })
}

fn serialize(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| EMPTY_OBJECT.to_owned())
}

/// Rewrite relaxed JSON into strict JSON, then parse it
///
/// Handles single-quoted strings, unquoted object keys, bare-word string
/// values, trailing commas, and Python's `True`/`False`/`None`.
fn lenient_parse(raw: &str) -> Option<Value> {
    let mut out = String::with_capacity(raw.len() + 8);
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' | '\'' => {
                let quote = ch;
                out.push('"');
                let mut escaped = false;
                for inner in chars.by_ref() {
                    if escaped {
                        // `\'` is not a JSON escape; emit the quote bare.
                        if inner == '\'' {
                            out.push('\'');
                        } else {
                            out.push('\\');
                            out.push(inner);
                        }
                        escaped = false;
                        continue;
                    }
                    match inner {
                        '\\' => escaped = true,
                        '"' if quote == '\'' => out.push_str("\\\""),
                        c if c == quote => {
                            out.push('"');
                            break;
                        }
                        c => out.push(c),
                    }
                }
            }
            ',' => {
                // Drop the comma if the next significant char closes a scope.
                let mut lookahead = chars.clone();
                let mut next_significant = None;
                for c in lookahead.by_ref() {
                    if !c.is_whitespace() {
                        next_significant = Some(c);
                        break;
                    }
                }
                if matches!(next_significant, Some('}' | ']')) {
                    continue;
                }
                out.push(',');
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                word.push(c);
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.as_str() {
                    "true" | "false" | "null" => out.push_str(&word),
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" => out.push_str("null"),
                    // Bare token: an unquoted key or string value.
                    _ => {
                        out.push('"');
                        out.push_str(&word);
                        out.push('"');
                    }
                }
            }
            c => out.push(c),
        }
    }

    serde_json::from_str(&out).ok()
}

/// Balance braces and brackets on a truncated payload, then re-parse
fn structural_repair(raw: &str) -> Option<Value> {
    let start = raw.find(['{', '['])?;
    let candidate = raw[start..].trim_end();

    let suffix = completion_suffix(candidate)?;
    let balanced = format!("{candidate}{suffix}");

    serde_json::from_str(&balanced)
        .ok()
        .or_else(|| lenient_parse(&balanced))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_json_passes_through_unchanged() {
        assert_eq!(repair(r#"{"city":"Paris"}"#), r#"{"city":"Paris"}"#);
        assert_eq!(repair("[1,2,3]"), "[1,2,3]");
    }

    #[test]
    fn repair_is_idempotent() {
        let once = repair("{city: 'Paris',}");
        assert_eq!(repair(&once), once);
    }

    #[test]
    fn relaxed_syntax_is_normalized() {
        assert_eq!(repair("{city: 'Paris',}"), r#"{"city":"Paris"}"#);
    }

    #[test]
    fn python_literals_are_translated() {
        assert_eq!(repair("{enabled: True, label: None}"), r#"{"enabled":true,"label":null}"#);
    }

    #[test]
    fn truncated_payload_is_balanced() {
        assert_eq!(repair(r#"{"a": {"b": 1"#), r#"{"a":{"b":1}}"#);
        assert_eq!(repair(r#"{"query": "par"#), r#"{"query":"par"}"#);
    }

    #[test]
    fn garbage_degrades_to_empty_object() {
        assert_eq!(repair("not json at all {{{"), EMPTY_OBJECT);
        assert_eq!(repair(""), EMPTY_OBJECT);
        assert_eq!(repair("   "), EMPTY_OBJECT);
    }

    #[test]
    fn every_output_parses() {
        for input in [
            r#"{"ok":1}"#,
            "{a: 'b',}",
            "truncated {\"x\": [1, 2",
            "<<<definitely not json>>>",
            "{'nested': {'deep': [1,, }",
        ] {
            let repaired = repair(input);
            serde_json::from_str::<Value>(&repaired).expect("repair output must parse");
        }
    }

    #[test]
    fn suffix_for_parseable_prefixes() {
        assert_eq!(completion_suffix(r#"{"a":1}"#).unwrap(), "");
        assert_eq!(completion_suffix(r#"{"a":1"#).unwrap(), "}");
        assert_eq!(completion_suffix(r#"{"a":"par"#).unwrap(), "\"}");
        assert_eq!(completion_suffix(r#"{"a":"#).unwrap(), "null}");
        assert_eq!(completion_suffix(r#"{"a":1,"#).unwrap(), "\"\":null}");
    }

    #[test]
    fn suffix_rejects_mismatched_closers() {
        assert!(completion_suffix(r#"{"a": ]"#).is_none());
    }
}

//! Recovery of tool calls expressed as assistant free text
//!
//! Some backends never populate structured tool-call fields and instead
//! describe the call inside the message text. The harvester recognizes
//! four textual conventions and extracts structured calls from them,
//! returning whatever text remains once the matched spans are removed.
//!
//! Each convention is an independent [`TextMatcher`]; adding a fifth
//! convention means adding one matcher to the default list and touching
//! nothing else. The harvester preserves document order and does not
//! deduplicate — that is the canonicalizer's job.

use std::sync::OnceLock;

use regex::Regex;

use crosswire_core::ToolCall;

use super::repair;

/// A tool invocation recovered from text, before repair
#[derive(Debug, Clone)]
pub struct ToolIntent {
    /// Function name
    pub name: String,
    /// Raw argument text as found
    pub raw_arguments: String,
}

/// A matched span within the scanned text
#[derive(Debug, Clone)]
pub struct TextMatch {
    /// Byte offset where the span starts
    pub start: usize,
    /// Byte offset one past the span's end
    pub end: usize,
    /// Recovered intent; `None` for strip-only conventions
    pub intent: Option<ToolIntent>,
}

/// One textual tool-intent convention
pub trait TextMatcher: Send + Sync {
    /// Convention name, used in logs
    fn name(&self) -> &'static str;

    /// All spans of this convention within `text`, in document order
    fn find(&self, text: &str) -> Vec<TextMatch>;
}

/// Result of scanning one assistant turn
#[derive(Debug, Clone)]
pub struct Harvest {
    /// Recovered calls, in document order
    pub tool_calls: Vec<ToolCall>,
    /// Input text with all matched spans removed
    pub residual_text: String,
}

/// Generate a fresh unique tool call id
pub fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Ordered collection of matchers applied to assistant text
pub struct Harvester {
    matchers: Vec<Box<dyn TextMatcher>>,
}

impl Default for Harvester {
    fn default() -> Self {
        Self {
            matchers: vec![
                Box::new(FencedBlockMatcher),
                Box::new(XmlTagMatcher),
                Box::new(ExecuteLineMatcher),
                Box::new(ToolResultEchoMatcher),
            ],
        }
    }
}

impl Harvester {
    /// Build a harvester from an explicit matcher list
    ///
    /// New textual conventions plug in here without touching the
    /// existing ones.
    pub fn with_matchers(matchers: Vec<Box<dyn TextMatcher>>) -> Self {
        Self { matchers }
    }

    /// Whether any convention matches the text at all
    ///
    /// Cheap pre-check used by the canonicalizer's suspicion heuristic.
    pub fn matches(&self, text: &str) -> bool {
        self.matchers.iter().any(|m| !m.find(text).is_empty())
    }

    /// Scan `text` for tool intent and strip matched spans
    pub fn harvest(&self, text: &str) -> Harvest {
        let mut matches: Vec<(usize, TextMatch)> = Vec::new();
        for (order, matcher) in self.matchers.iter().enumerate() {
            for found in matcher.find(text) {
                tracing::debug!(
                    matcher = matcher.name(),
                    start = found.start,
                    end = found.end,
                    has_intent = found.intent.is_some(),
                    "text matcher hit"
                );
                matches.push((order, found));
            }
        }

        matches.sort_by_key(|(order, m)| (m.start, *order));

        // Overlapping spans keep the earliest match only.
        let mut selected: Vec<TextMatch> = Vec::new();
        let mut last_end = 0usize;
        for (_, m) in matches {
            if m.start < last_end {
                continue;
            }
            last_end = m.end;
            selected.push(m);
        }

        let mut tool_calls = Vec::new();
        let mut residual = String::with_capacity(text.len());
        let mut cursor = 0usize;

        for m in &selected {
            residual.push_str(&text[cursor..m.start]);
            cursor = m.end;

            if let Some(intent) = &m.intent {
                let arguments = repair::repair(&intent.raw_arguments);
                tool_calls.push(ToolCall::new(generate_call_id(), intent.name.clone(), arguments));
            }
        }
        residual.push_str(&text[cursor..]);

        Harvest {
            tool_calls,
            residual_text: tidy_residual(&residual),
        }
    }
}

/// Collapse the whitespace holes left by span removal
fn tidy_residual(text: &str) -> String {
    static BLANK_RUNS: OnceLock<Regex> = OnceLock::new();
    let re = BLANK_RUNS.get_or_init(|| Regex::new(r"\n{3,}").expect("valid regex"));
    re.replace_all(text, "\n\n").trim().to_owned()
}

/// Parse a JSON-bodied intent block into name + raw arguments
///
/// Accepts `arguments`, `parameters`, or `input` as the argument key; the
/// argument value may be an object or an embedded JSON string.
fn parse_intent_json(body: &str) -> Option<ToolIntent> {
    let repaired = repair::repair(body);
    let value: serde_json::Value = serde_json::from_str(&repaired).ok()?;
    let object = value.as_object()?;

    let name = object.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }

    let raw_arguments = ["arguments", "parameters", "input"]
        .iter()
        .find_map(|key| object.get(*key))
        .map_or_else(
            || repair::EMPTY_OBJECT.to_owned(),
            |args| match args {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        );

    Some(ToolIntent {
        name: name.to_owned(),
        raw_arguments,
    })
}

// -- Convention 1: fenced blocks with a versioned tool-intent marker --

/// ```` ```tool_call ```` / ```` ```tool_call_v1 ```` fenced JSON blocks
struct FencedBlockMatcher;

impl TextMatcher for FencedBlockMatcher {
    fn name(&self) -> &'static str {
        "fenced_block"
    }

    fn find(&self, text: &str) -> Vec<TextMatch> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN
            .get_or_init(|| Regex::new(r"(?s)```tool_call(?:_v\d+)?[ \t]*\n(.*?)```").expect("valid regex"));

        re.captures_iter(text)
            .map(|caps| {
                let whole = caps.get(0).expect("group 0 always present");
                let body = caps.get(1).map_or("", |m| m.as_str());
                TextMatch {
                    start: whole.start(),
                    end: whole.end(),
                    intent: parse_intent_json(body),
                }
            })
            .collect()
    }
}

// -- Convention 2: XML-style tag blocks --

/// `<tool_call>{…}</tool_call>` blocks
struct XmlTagMatcher;

impl TextMatcher for XmlTagMatcher {
    fn name(&self) -> &'static str {
        "xml_tag"
    }

    fn find(&self, text: &str) -> Vec<TextMatch> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| Regex::new(r"(?s)<tool_call>\s*(.*?)\s*</tool_call>").expect("valid regex"));

        re.captures_iter(text)
            .map(|caps| {
                let whole = caps.get(0).expect("group 0 always present");
                let body = caps.get(1).map_or("", |m| m.as_str());
                TextMatch {
                    start: whole.start(),
                    end: whole.end(),
                    intent: parse_intent_json(body),
                }
            })
            .collect()
    }
}

// -- Convention 3: Execute-style command lines --

/// `Execute: tool_name {"arg": …}` lines
struct ExecuteLineMatcher;

impl TextMatcher for ExecuteLineMatcher {
    fn name(&self) -> &'static str {
        "execute_line"
    }

    fn find(&self, text: &str) -> Vec<TextMatch> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| {
            Regex::new(r"(?m)^[ \t]*Execute:[ \t]*([A-Za-z_][A-Za-z0-9_.-]*)[ \t]*(\{.*\})?[ \t]*$")
                .expect("valid regex")
        });

        re.captures_iter(text)
            .map(|caps| {
                let whole = caps.get(0).expect("group 0 always present");
                let name = caps.get(1).map_or("", |m| m.as_str());
                let raw_arguments = caps.get(2).map_or(repair::EMPTY_OBJECT, |m| m.as_str());
                TextMatch {
                    start: whole.start(),
                    end: whole.end(),
                    intent: Some(ToolIntent {
                        name: name.to_owned(),
                        raw_arguments: raw_arguments.to_owned(),
                    }),
                }
            })
            .collect()
    }
}

// -- Convention 4: tool-result echo wrappers (strip only) --

/// `<tool_result>…</tool_result>` / `<tool_response>…</tool_response>`
/// residue a backend echoed back from a prior turn
///
/// Never produces calls; the wrapped content is neither a new tool call
/// nor new content and must not reach the client.
struct ToolResultEchoMatcher;

impl TextMatcher for ToolResultEchoMatcher {
    fn name(&self) -> &'static str {
        "tool_result_echo"
    }

    fn find(&self, text: &str) -> Vec<TextMatch> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| {
            Regex::new(r"(?s)<tool_result>.*?</tool_result>|<tool_response>.*?</tool_response>").expect("valid regex")
        });

        re.find_iter(text)
            .map(|m| TextMatch {
                start: m.start(),
                end: m.end(),
                intent: None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn harvester() -> Harvester {
        Harvester::default()
    }

    #[test]
    fn xml_tag_block_is_recovered() {
        let text = r#"I'll check. <tool_call>{"name":"get_weather","arguments":{"city":"Paris"}}</tool_call>"#;
        let harvest = harvester().harvest(text);

        assert_eq!(harvest.tool_calls.len(), 1);
        let call = &harvest.tool_calls[0];
        assert_eq!(call.function.name, "get_weather");
        assert_eq!(call.function.arguments, r#"{"city":"Paris"}"#);
        assert!(call.id.starts_with("call_"));
        assert_eq!(harvest.residual_text, "I'll check.");
    }

    #[test]
    fn fenced_block_is_recovered() {
        let text = indoc! {r#"
            Running the lookup now.

            ```tool_call_v1
            {"name": "search", "arguments": {"query": "rust"}}
            ```
        "#};
        let harvest = harvester().harvest(text);

        assert_eq!(harvest.tool_calls.len(), 1);
        assert_eq!(harvest.tool_calls[0].function.name, "search");
        assert_eq!(harvest.tool_calls[0].function.arguments, r#"{"query":"rust"}"#);
        assert_eq!(harvest.residual_text, "Running the lookup now.");
    }

    #[test]
    fn unversioned_fence_also_matches() {
        let text = "```tool_call\n{\"name\":\"ping\"}\n```";
        let harvest = harvester().harvest(text);
        assert_eq!(harvest.tool_calls.len(), 1);
        assert_eq!(harvest.tool_calls[0].function.name, "ping");
        assert_eq!(harvest.tool_calls[0].function.arguments, "{}");
    }

    #[test]
    fn execute_line_is_recovered() {
        let text = "Execute: list_files {\"path\": \"/tmp\"}\ndone";
        let harvest = harvester().harvest(text);

        assert_eq!(harvest.tool_calls.len(), 1);
        assert_eq!(harvest.tool_calls[0].function.name, "list_files");
        assert_eq!(harvest.tool_calls[0].function.arguments, r#"{"path": "/tmp"}"#);
        assert_eq!(harvest.residual_text, "done");
    }

    #[test]
    fn execute_line_without_args_gets_empty_object() {
        let harvest = harvester().harvest("Execute: refresh");
        assert_eq!(harvest.tool_calls.len(), 1);
        assert_eq!(harvest.tool_calls[0].function.arguments, "{}");
    }

    #[test]
    fn tool_result_echo_is_stripped_not_harvested() {
        let text = "Previously: <tool_result>{\"temp\": 21}</tool_result> All done.";
        let harvest = harvester().harvest(text);

        assert!(harvest.tool_calls.is_empty());
        assert_eq!(harvest.residual_text, "Previously:  All done.");
    }

    #[test]
    fn multiple_blocks_preserve_document_order() {
        let text = concat!(
            "<tool_call>{\"name\":\"first\",\"arguments\":{}}</tool_call>\n",
            "Execute: second {\"n\": 2}\n",
            "<tool_call>{\"name\":\"third\",\"arguments\":{}}</tool_call>",
        );
        let harvest = harvester().harvest(text);

        let names: Vec<_> = harvest.tool_calls.iter().map(|c| c.function.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn duplicates_are_not_removed_here() {
        let text = concat!(
            "<tool_call>{\"name\":\"ping\",\"arguments\":{}}</tool_call>",
            "<tool_call>{\"name\":\"ping\",\"arguments\":{}}</tool_call>",
        );
        let harvest = harvester().harvest(text);
        assert_eq!(harvest.tool_calls.len(), 2);
    }

    #[test]
    fn malformed_arguments_are_repaired() {
        let text = "<tool_call>{\"name\":\"lookup\",\"arguments\":\"{city: 'Paris',}\"}</tool_call>";
        let harvest = harvester().harvest(text);

        assert_eq!(harvest.tool_calls.len(), 1);
        assert_eq!(harvest.tool_calls[0].function.arguments, r#"{"city":"Paris"}"#);
    }

    #[test]
    fn block_without_a_name_yields_no_call() {
        let harvest = harvester().harvest("<tool_call>{\"arguments\":{}}</tool_call>");
        assert!(harvest.tool_calls.is_empty());
    }

    #[test]
    fn plain_text_is_a_miss_not_an_error() {
        let harvest = harvester().harvest("Just a normal sentence about tools.");
        assert!(harvest.tool_calls.is_empty());
        assert_eq!(harvest.residual_text, "Just a normal sentence about tools.");
    }

    #[test]
    fn matches_is_a_cheap_precheck() {
        let h = harvester();
        assert!(h.matches("<tool_call>{}</tool_call>"));
        assert!(h.matches("Execute: anything"));
        assert!(h.matches("<tool_result>x</tool_result>"));
        assert!(!h.matches("nothing interesting here"));
    }

    #[test]
    fn custom_matchers_plug_in_without_touching_the_rest() {
        struct BangLineMatcher;

        impl TextMatcher for BangLineMatcher {
            fn name(&self) -> &'static str {
                "bang_line"
            }

            fn find(&self, text: &str) -> Vec<TextMatch> {
                text.match_indices("!run ")
                    .map(|(start, _)| {
                        let end = text[start..].find('\n').map_or(text.len(), |n| start + n);
                        let name = text[start + 5..end].trim().to_owned();
                        TextMatch {
                            start,
                            end,
                            intent: Some(ToolIntent {
                                name,
                                raw_arguments: "{}".to_owned(),
                            }),
                        }
                    })
                    .collect()
            }
        }

        let harvester = Harvester::with_matchers(vec![Box::new(BangLineMatcher)]);
        let harvest = harvester.harvest("!run refresh");
        assert_eq!(harvest.tool_calls.len(), 1);
        assert_eq!(harvest.tool_calls[0].function.name, "refresh");
    }

    #[test]
    fn fresh_ids_are_unique() {
        let text = concat!(
            "<tool_call>{\"name\":\"a\",\"arguments\":{}}</tool_call>",
            "<tool_call>{\"name\":\"b\",\"arguments\":{}}</tool_call>",
        );
        let harvest = harvester().harvest(text);
        assert_ne!(harvest.tool_calls[0].id, harvest.tool_calls[1].id);
    }
}

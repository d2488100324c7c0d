//! Tool call canonicalization
//!
//! The canonicalizer is the single entry point through which every
//! decoded assistant turn passes. Codecs never harvest text or repair
//! arguments themselves; they hand the raw turn here and receive a turn
//! that satisfies the engine-wide invariants:
//!
//! - every argument string parses as JSON;
//! - call ids are unique within the turn;
//! - a turn with tool calls has no client-visible content and finishes
//!   with `tool_calls`.

pub mod harvest;
pub mod repair;

use std::collections::HashSet;
use std::sync::Arc;

use crosswire_core::{FinishReason, SchemaRegistry, ToolCall};

pub use harvest::{Harvest, Harvester, TextMatch, TextMatcher, ToolIntent, generate_call_id};

/// A raw assistant turn as decoded from a backend response
#[derive(Debug, Clone, Default)]
pub struct AssistantTurn {
    /// Free text content, possibly containing textual tool intent
    pub content: Option<String>,
    /// Structured tool calls as the backend reported them
    pub tool_calls: Vec<ToolCall>,
    /// Finish reason as the backend reported it
    pub finish_reason: Option<FinishReason>,
}

/// Normalizes raw assistant turns into canonical form
pub struct Canonicalizer {
    registry: Arc<SchemaRegistry>,
    harvester: Harvester,
}

impl Canonicalizer {
    /// Create a canonicalizer over a registry snapshot
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            harvester: Harvester::default(),
        }
    }

    /// Produce a canonical turn from a raw one
    ///
    /// Running this on an already-canonical turn is a no-op: repaired
    /// arguments repair to themselves, a content of `None` cannot match
    /// any text pattern, and deduplication is stable.
    pub fn canonicalize(&self, turn: AssistantTurn) -> AssistantTurn {
        let AssistantTurn {
            content,
            tool_calls,
            finish_reason,
        } = turn;

        // Structured calls first: repair arguments, validate against the
        // registry, make ids unique.
        let mut calls = self.normalize_structured(tool_calls);

        // A turn is suspicious when its text matches any harvester
        // convention: either the backend skipped the structured fields
        // entirely, or it narrated the same intent around them.
        let mut residual = content;
        if let Some(text) = residual.as_deref()
            && self.harvester.matches(text)
        {
            let harvest = self.harvester.harvest(text);
            for call in &harvest.tool_calls {
                self.validate_against_registry(call);
            }
            calls.extend(harvest.tool_calls);
            residual = if harvest.residual_text.is_empty() {
                None
            } else {
                Some(harvest.residual_text)
            };
        }

        let calls = drop_adjacent_duplicates(calls);

        if calls.is_empty() {
            return AssistantTurn {
                content: residual,
                tool_calls: calls,
                finish_reason,
            };
        }

        if let Some(text) = residual.as_deref()
            && !text.is_empty()
        {
            tracing::debug!(len = text.len(), "dropping narrative text around tool calls");
        }

        AssistantTurn {
            content: None,
            tool_calls: calls,
            finish_reason: Some(FinishReason::ToolCalls),
        }
    }

    /// Repair, validate, and re-id the backend's structured calls
    fn normalize_structured(&self, tool_calls: Vec<ToolCall>) -> Vec<ToolCall> {
        let mut seen_ids: HashSet<String> = HashSet::new();

        tool_calls
            .into_iter()
            .map(|mut call| {
                let repaired = repair::repair(&call.function.arguments);
                if repaired != call.function.arguments {
                    tracing::warn!(
                        tool = %call.function.name,
                        "repaired malformed tool call arguments"
                    );
                    call.function.arguments = repaired;
                }

                if call.id.is_empty() || !seen_ids.insert(call.id.clone()) {
                    let fresh = generate_call_id();
                    tracing::debug!(tool = %call.function.name, id = %fresh, "reassigned tool call id");
                    seen_ids.insert(fresh.clone());
                    call.id = fresh;
                }

                self.validate_against_registry(&call);
                call
            })
            .collect()
    }

    /// Advisory schema check: log, never drop
    ///
    /// Losing a call the model intended is worse than surfacing one the
    /// client will reject.
    fn validate_against_registry(&self, call: &ToolCall) {
        if self.registry.is_empty() {
            return;
        }

        let Some(schema) = self.registry.get(&call.function.name) else {
            tracing::warn!(tool = %call.function.name, "tool call names an unregistered tool");
            return;
        };

        let Ok(args) = serde_json::from_str::<serde_json::Value>(&call.function.arguments) else {
            return;
        };

        for required in schema.required_parameters() {
            if args.get(required).is_none() {
                tracing::warn!(
                    tool = %call.function.name,
                    parameter = required,
                    "tool call is missing a required parameter"
                );
            }
        }
    }
}

/// Remove back-to-back duplicate invocations
///
/// Only adjacent duplicates collapse; identical calls separated by any
/// other call are legitimate repeats and survive.
fn drop_adjacent_duplicates(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut out: Vec<ToolCall> = Vec::with_capacity(calls.len());

    for call in calls {
        if out.last().is_some_and(|prev| prev.same_invocation(&call)) {
            tracing::debug!(tool = %call.function.name, "dropped adjacent duplicate tool call");
            continue;
        }
        out.push(call);
    }

    out
}

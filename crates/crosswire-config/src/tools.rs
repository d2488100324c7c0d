use serde::Deserialize;

/// A single tool schema declaration
///
/// The `parameters` value is an opaque JSON Schema object; crosswire never
/// interprets it beyond the top-level `required` list.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolEntry {
    /// Tool name as exposed to models
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema for the tool's arguments
    pub parameters: serde_json::Value,
}

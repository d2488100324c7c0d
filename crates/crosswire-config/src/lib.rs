//! Declarative configuration for the crosswire engine
//!
//! Two concerns are configured here: the tool schema table that seeds the
//! schema registry at process start, and the streaming transformer's
//! argument-coalescing behavior. Everything is plain TOML; no secrets, no
//! environment expansion.

#![allow(clippy::must_use_candidate)]

pub mod stream;
pub mod tools;

use std::path::Path;

use serde::Deserialize;

pub use stream::StreamConfig;
pub use tools::ToolEntry;

/// Top-level crosswire configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Streaming transformer configuration
    #[serde(default)]
    pub stream: StreamConfig,
    /// Tool schema declarations, in declaration order
    #[serde(default)]
    pub tools: Vec<ToolEntry>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, TOML parsing fails,
    /// or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string
    ///
    /// # Errors
    ///
    /// Returns an error if TOML parsing or validation fails
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error if tool declarations are malformed or the
    /// coalescing window cannot be parsed
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_tools()?;
        self.stream.validate()?;
        Ok(())
    }

    /// Ensure tool declarations are well-formed and unique by name
    fn validate_tools(&self) -> anyhow::Result<()> {
        let mut seen = indexmap::IndexSet::new();

        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                anyhow::bail!("tool declaration has an empty name");
            }
            if !seen.insert(tool.name.as_str()) {
                anyhow::bail!("duplicate tool declaration: '{}'", tool.name);
            }
            if !tool.parameters.is_object() {
                anyhow::bail!("tool '{}' parameters must be a JSON schema object", tool.name);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn parses_full_config() {
        let config = Config::from_toml_str(indoc! {r#"
            [stream]
            coalesce_tool_args = true
            coalesce_window = "50ms"

            [[tools]]
            name = "get_weather"
            description = "Look up current weather"
            [tools.parameters]
            type = "object"
            required = ["city"]
        "#})
        .expect("config should parse");

        assert!(config.stream.coalesce_tool_args);
        assert_eq!(config.tools.len(), 1);
        assert_eq!(config.tools[0].name, "get_weather");
        assert_eq!(
            config.tools[0].parameters.get("required"),
            Some(&serde_json::json!(["city"]))
        );
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml_str("").expect("empty config is valid");
        assert!(!config.stream.coalesce_tool_args);
        assert!(config.tools.is_empty());
    }

    #[test]
    fn rejects_duplicate_tool_names() {
        let err = Config::from_toml_str(indoc! {r#"
            [[tools]]
            name = "lookup"
            [tools.parameters]
            type = "object"

            [[tools]]
            name = "lookup"
            [tools.parameters]
            type = "object"
        "#})
        .unwrap_err();
        assert!(err.to_string().contains("duplicate tool declaration"));
    }

    #[test]
    fn rejects_empty_tool_name() {
        let err = Config::from_toml_str(indoc! {r#"
            [[tools]]
            name = "  "
            [tools.parameters]
            type = "object"
        "#})
        .unwrap_err();
        assert!(err.to_string().contains("empty name"));
    }

    #[test]
    fn rejects_non_object_parameters() {
        let err = Config::from_toml_str(indoc! {r#"
            [[tools]]
            name = "lookup"
            parameters = "not a schema"
        "#})
        .unwrap_err();
        assert!(err.to_string().contains("JSON schema object"));
    }

    #[test]
    fn rejects_bad_coalesce_window() {
        let err = Config::from_toml_str(indoc! {r#"
            [stream]
            coalesce_window = "not-a-duration"
        "#})
        .unwrap_err();
        assert!(err.to_string().contains("coalesce_window"));
    }
}

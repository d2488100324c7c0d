//! Process-lifetime tool schema registry
//!
//! Built once from configuration at startup and read by every concurrent
//! request. Reload replaces the whole snapshot atomically; a request that
//! took a snapshot before the swap keeps seeing its own consistent view.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crosswire_config::ToolEntry;

/// Schema for a single known tool
#[derive(Debug, Clone)]
pub struct ToolSchema {
    /// Tool name
    pub name: String,
    /// Human-readable description
    pub description: Option<String>,
    /// JSON Schema for the tool's arguments
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    /// Names listed in the schema's top-level `required` array
    pub fn required_parameters(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(serde_json::Value::as_array)
            .map(|names| names.iter().filter_map(serde_json::Value::as_str).collect())
            .unwrap_or_default()
    }
}

impl From<&ToolEntry> for ToolSchema {
    fn from(entry: &ToolEntry) -> Self {
        Self {
            name: entry.name.clone(),
            description: entry.description.clone(),
            parameters: entry.parameters.clone(),
        }
    }
}

/// Immutable name → schema lookup table
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tools: HashMap<String, ToolSchema>,
}

impl SchemaRegistry {
    /// Build a registry from configuration entries
    pub fn from_config(entries: &[ToolEntry]) -> Self {
        let tools = entries
            .iter()
            .map(|entry| (entry.name.clone(), ToolSchema::from(entry)))
            .collect();
        Self { tools }
    }

    /// Build a registry from already-constructed schemas
    pub fn from_schemas(schemas: impl IntoIterator<Item = ToolSchema>) -> Self {
        let tools = schemas.into_iter().map(|s| (s.name.clone(), s)).collect();
        Self { tools }
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<&ToolSchema> {
        self.tools.get(name)
    }

    /// Whether a tool name is known
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Shared handle to the current registry snapshot
///
/// Readers take an `Arc` snapshot once per request; reload swaps the inner
/// `Arc` so in-flight requests never observe a partially updated table.
#[derive(Debug)]
pub struct RegistryHandle {
    inner: RwLock<Arc<SchemaRegistry>>,
}

impl RegistryHandle {
    /// Wrap an initial registry
    pub fn new(registry: SchemaRegistry) -> Self {
        Self {
            inner: RwLock::new(Arc::new(registry)),
        }
    }

    /// Take the current snapshot
    ///
    /// # Panics
    ///
    /// Panics only if the lock is poisoned, which requires a prior panic
    /// while swapping.
    pub fn snapshot(&self) -> Arc<SchemaRegistry> {
        Arc::clone(&self.inner.read().expect("registry lock poisoned"))
    }

    /// Replace the registry with a new snapshot
    ///
    /// # Panics
    ///
    /// Panics only if the lock is poisoned.
    pub fn swap(&self, registry: SchemaRegistry) {
        let mut guard = self.inner.write().expect("registry lock poisoned");
        tracing::debug!(tools = registry.len(), "schema registry reloaded");
        *guard = Arc::new(registry);
    }
}

impl Default for RegistryHandle {
    fn default() -> Self {
        Self::new(SchemaRegistry::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(name: &str) -> ToolSchema {
        ToolSchema {
            name: name.to_owned(),
            description: None,
            parameters: serde_json::json!({"type": "object", "required": ["q"]}),
        }
    }

    #[test]
    fn lookup_by_name() {
        let registry = SchemaRegistry::from_schemas([schema("search")]);
        assert!(registry.contains("search"));
        assert!(!registry.contains("other"));
        assert_eq!(registry.get("search").unwrap().required_parameters(), vec!["q"]);
    }

    #[test]
    fn snapshot_survives_swap() {
        let handle = RegistryHandle::new(SchemaRegistry::from_schemas([schema("old")]));
        let before = handle.snapshot();

        handle.swap(SchemaRegistry::from_schemas([schema("new")]));

        // The old snapshot still sees its own table; new readers see the swap.
        assert!(before.contains("old"));
        assert!(!before.contains("new"));
        assert!(handle.snapshot().contains("new"));
    }
}

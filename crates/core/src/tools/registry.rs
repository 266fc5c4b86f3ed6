use super::ToolFactory;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry of tool factories keyed by tool name
#[derive(Clone)]
pub struct ToolRegistry {
    factories: BTreeMap<String, Arc<dyn ToolFactory>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register a factory under its own name, replacing any previous one
    pub fn register(&mut self, factory: Arc<dyn ToolFactory>) {
        let name = factory.name().to_string();
        tracing::debug!("Registered tool: {}", name);
        self.factories.insert(name, factory);
    }

    /// Get a factory by tool name
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn ToolFactory>> {
        self.factories.get(name).cloned()
    }

    /// Check if a tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered tool names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

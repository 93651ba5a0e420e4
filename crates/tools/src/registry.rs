//! Tool Registry
//!
//! Per-session table of function items. Registration order is irrelevant;
//! lookup is by name. The two tool kinds are structurally distinct traits so
//! dispatch cannot hand engine internals to a user-level tool.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use voxline_core::{ActionResponse, ToolSchema};
use voxline_engine::{DIContainer, EventBus};

use crate::{ToolError, DEFAULT_TOOL_TIMEOUT_SECS};

/// Plugin context handed to system-control tools.
#[derive(Clone)]
pub struct SystemContext {
    pub session_id: String,
    pub container: Arc<DIContainer>,
    pub bus: Arc<EventBus>,
}

/// A tool that acts on the engine itself.
#[async_trait]
pub trait SystemTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;

    fn timeout_secs(&self) -> u64 {
        DEFAULT_TOOL_TIMEOUT_SECS
    }

    async fn invoke(&self, ctx: &SystemContext, args: Value) -> Result<ActionResponse, ToolError>;
}

/// A user-level tool that sees only its declared arguments.
#[async_trait]
pub trait FunctionTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> Value;

    fn timeout_secs(&self) -> u64 {
        DEFAULT_TOOL_TIMEOUT_SECS
    }

    async fn invoke(&self, args: Value) -> Result<ActionResponse, ToolError>;
}

/// One registered function item.
#[derive(Clone)]
pub enum ToolEntry {
    System(Arc<dyn SystemTool>),
    Function(Arc<dyn FunctionTool>),
}

impl ToolEntry {
    pub fn name(&self) -> &str {
        match self {
            ToolEntry::System(tool) => tool.name(),
            ToolEntry::Function(tool) => tool.name(),
        }
    }

    pub fn schema(&self) -> ToolSchema {
        match self {
            ToolEntry::System(tool) => ToolSchema {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            },
            ToolEntry::Function(tool) => ToolSchema {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            },
        }
    }

    pub fn timeout_secs(&self) -> u64 {
        match self {
            ToolEntry::System(tool) => tool.timeout_secs(),
            ToolEntry::Function(tool) => tool.timeout_secs(),
        }
    }
}

/// Per-session tool table.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolEntry>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_system(&self, tool: impl SystemTool + 'static) {
        let entry = ToolEntry::System(Arc::new(tool));
        self.tools.write().insert(entry.name().to_string(), entry);
    }

    pub fn register_function(&self, tool: impl FunctionTool + 'static) {
        let entry = ToolEntry::Function(Arc::new(tool));
        self.tools.write().insert(entry.name().to_string(), entry);
    }

    pub fn register_entry(&self, entry: ToolEntry) {
        self.tools.write().insert(entry.name().to_string(), entry);
    }

    pub fn remove(&self, name: &str) -> Option<ToolEntry> {
        self.tools.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<ToolEntry> {
        self.tools.read().get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> =
            self.tools.read().values().map(|e| e.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxline_core::Action;

    struct Echo;

    #[async_trait]
    impl FunctionTool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input"
        }

        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn invoke(&self, args: Value) -> Result<ActionResponse, ToolError> {
            let text = args
                .get("text")
                .and_then(|t| t.as_str())
                .unwrap_or_default();
            Ok(ActionResponse::response(text))
        }
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());

        registry.register_function(Echo);
        assert!(registry.has("echo"));
        assert_eq!(registry.len(), 1);

        let entry = registry.get("echo").unwrap();
        let ToolEntry::Function(tool) = entry else {
            panic!("expected a function tool");
        };
        let result = tool
            .invoke(serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(result.action, Action::Response);
        assert_eq!(result.response.as_deref(), Some("hi"));
    }

    #[test]
    fn schemas_are_sorted_by_name() {
        let registry = ToolRegistry::new();
        registry.register_function(Echo);
        let schemas = registry.schemas();
        assert_eq!(schemas[0].name, "echo");
    }
}

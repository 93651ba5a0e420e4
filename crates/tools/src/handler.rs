//! Tool Handler
//!
//! The session's [`ToolDispatcher`]: looks the function item up, normalizes
//! the model-supplied arguments, enforces the per-tool timeout, and maps
//! every failure to an error action instead of a fault across the bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use voxline_core::{ActionResponse, CoreError, ToolCallRequest, ToolDispatcher, ToolSchema};

use crate::registry::{SystemContext, ToolEntry, ToolRegistry};
use crate::ToolError;

pub struct ToolHandler {
    registry: Arc<ToolRegistry>,
    context: SystemContext,
}

impl ToolHandler {
    pub fn new(registry: Arc<ToolRegistry>, context: SystemContext) -> Self {
        Self { registry, context }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Models emit arguments as an object or as a JSON-encoded string;
    /// accept both.
    fn parse_arguments(raw: &str) -> Value {
        if raw.trim().is_empty() {
            return Value::Object(Default::default());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::String(inner)) => {
                serde_json::from_str(&inner).unwrap_or(Value::String(inner))
            }
            Ok(value) => value,
            Err(_) => Value::Object(Default::default()),
        }
    }

    async fn execute(&self, entry: ToolEntry, args: Value) -> Result<ActionResponse, ToolError> {
        let timeout = Duration::from_secs(entry.timeout_secs());
        let name = entry.name().to_string();

        let run = async {
            match entry {
                ToolEntry::System(tool) => tool.invoke(&self.context, args).await,
                ToolEntry::Function(tool) => tool.invoke(args).await,
            }
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(name, timeout.as_secs())),
        }
    }
}

#[async_trait]
impl ToolDispatcher for ToolHandler {
    async fn handle_call(&self, call: ToolCallRequest) -> Result<ActionResponse, CoreError> {
        let Some(entry) = self.registry.get(&call.name) else {
            tracing::warn!(
                session_id = %self.context.session_id,
                tool = %call.name,
                "unknown tool requested"
            );
            return Ok(ActionResponse::error(format!(
                "I don't have a tool called '{}'.",
                call.name
            )));
        };

        let args = Self::parse_arguments(&call.arguments);
        tracing::debug!(
            session_id = %self.context.session_id,
            tool = %call.name,
            "executing tool"
        );

        match self.execute(entry, args).await {
            Ok(response) => Ok(response),
            Err(err) => {
                tracing::error!(
                    session_id = %self.context.session_id,
                    tool = %call.name,
                    error = %err,
                    "tool failed"
                );
                Ok(ActionResponse::error(err.to_string()))
            }
        }
    }

    fn schemas(&self) -> Vec<ToolSchema> {
        self.registry.schemas()
    }

    fn has_tool(&self, name: &str) -> bool {
        self.registry.has(name)
    }
}

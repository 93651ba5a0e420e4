//! Tool Dispatch Ports

use async_trait::async_trait;
use serde_json::Value;

use crate::ports::action::ActionResponse;
use crate::ports::llm::{ToolCallRequest, ToolSchema};
use crate::CoreError;

/// Session-scoped tool lookup and execution.
///
/// The dialogue service resolves one dispatcher per session; it classifies
/// each function item as system-control or user-level, executes it, and
/// returns a tagged [`ActionResponse`]. Unknown tools yield an error action,
/// never a failure across the bus.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Execute one tool call requested by the model.
    async fn handle_call(&self, call: ToolCallRequest) -> Result<ActionResponse, CoreError>;

    /// Schemas of every active tool, for the LLM request.
    fn schemas(&self) -> Vec<ToolSchema>;

    fn has_tool(&self, name: &str) -> bool;
}

/// Device-side tool protocol (MCP) when the client declared the capability.
#[async_trait]
pub trait DeviceToolBridge: Send + Sync {
    /// Send the initialize + tool-list handshake to the device.
    async fn initialize(&self) -> Result<(), CoreError>;

    /// Process one inbound `mcp` payload (JSON-RPC frame).
    async fn handle_payload(&self, payload: Value) -> Result<(), CoreError>;
}

//! Voxline Tools
//!
//! Function tools the LLM (or the intent classifier) can invoke. Tools come
//! in two kinds: system-control tools that receive a plugin context (session
//! id, container, event bus) and act on the engine, and user-level function
//! tools that receive only their declared arguments.

pub mod builtin;
pub mod device;
pub mod handler;
pub mod registry;

pub use device::McpBridge;
pub use handler::ToolHandler;
pub use registry::{FunctionTool, SystemContext, SystemTool, ToolEntry, ToolRegistry};

use thiserror::Error;

/// Default per-tool execution budget.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// Tool errors.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    NotFound(String),

    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("tool {0} timed out after {1}s")]
    Timeout(String, u64),

    #[error("tool {tool} failed: {message}")]
    Execution { tool: String, message: String },

    #[error("device rpc error: {0}")]
    DeviceRpc(String),
}

impl ToolError {
    pub fn invalid(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn execution(tool: impl Into<String>, message: impl ToString) -> Self {
        Self::Execution {
            tool: tool.into(),
            message: message.to_string(),
        }
    }
}

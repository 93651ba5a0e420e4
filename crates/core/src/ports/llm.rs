//! LLM Port
//!
//! Streaming chat completion with optional tool calling. The stream yields
//! text deltas as they arrive and completed tool calls once the provider has
//! assembled their fragments.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CoreError;

/// One message in the LLM input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Declared tool made available to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw arguments as emitted by the model (JSON text).
    pub arguments: String,
}

/// One item of a streaming LLM response.
#[derive(Debug, Clone)]
pub enum LlmChunk {
    /// Incremental text delta.
    Text(String),
    /// Tool calls assembled at end of turn.
    ToolCalls(Vec<ToolCallRequest>),
}

/// Boxed chunk stream returned by [`LlmPort::chat_stream`].
pub type LlmStream = BoxStream<'static, Result<LlmChunk, CoreError>>;

/// Streaming large language model.
#[async_trait]
pub trait LlmPort: Send + Sync {
    /// Start a streaming completion.
    ///
    /// `tools` is `None` when the caller must force a plain natural-language
    /// answer (recursion cap, nointent agents).
    async fn chat_stream(
        &self,
        session_id: &str,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolSchema>>,
    ) -> Result<LlmStream, CoreError>;
}

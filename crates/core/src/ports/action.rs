//! Tool Action Results
//!
//! Tagged result type returned by every tool execution. Replaces dynamic
//! dispatch on result shape with an explicit variant the dialogue service
//! matches on.

use serde::{Deserialize, Serialize};

/// What the engine should do with a tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Nothing further; the tool handled its own side effects.
    None,
    /// Speak `response` directly.
    Response,
    /// Speak the error text; do not re-invoke the LLM.
    Error,
    /// Feed `result` back to the LLM for another turn.
    RequestLlm,
}

/// Structured outcome of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub action: Action,
    /// Machine-facing payload (fed to the LLM on `RequestLlm`).
    pub result: Option<String>,
    /// User-facing text (spoken on `Response`).
    pub response: Option<String>,
}

impl ActionResponse {
    pub fn none() -> Self {
        Self {
            action: Action::None,
            result: None,
            response: None,
        }
    }

    pub fn response(text: impl Into<String>) -> Self {
        Self {
            action: Action::Response,
            result: None,
            response: Some(text.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            action: Action::Error,
            result: Some(message.clone()),
            response: Some(message),
        }
    }

    pub fn request_llm(result: impl Into<String>) -> Self {
        Self {
            action: Action::RequestLlm,
            result: Some(result.into()),
            response: None,
        }
    }
}

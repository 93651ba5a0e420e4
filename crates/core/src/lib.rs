//! Voxline Core
//!
//! Domain types and provider ports shared by every crate in the workspace:
//! session state, the typed event vocabulary, conversation history, TTS
//! sentence units, and the abstract contracts (VAD, ASR, TTS, LLM, intent,
//! memory, tools) that provider adapters implement.

pub mod agent;
pub mod conversation;
pub mod events;
pub mod ports;
pub mod sentence;
pub mod session;

pub use agent::{AgentConfig, IntentMode, MemoryMode};
pub use conversation::{ConversationHistory, Message, Role};
pub use events::{
    AbortRequest, AudioDataReceived, Event, SessionCreated, SessionDestroying, SpeechDetected,
    SpeechEnded, TextMessageReceived, TextRecognized, TtsUnitReady,
};
pub use ports::action::{Action, ActionResponse};
pub use ports::asr::{AsrPort, Transcription};
pub use ports::config::AgentConfigSource;
pub use ports::intent::IntentPort;
pub use ports::llm::{ChatMessage, LlmChunk, LlmPort, LlmStream, ToolCallRequest, ToolSchema};
pub use ports::memory::MemoryPort;
pub use ports::tools::{DeviceToolBridge, ToolDispatcher};
pub use ports::tts::{AudioFrame, TtsPort};
pub use ports::vad::{VadPort, VadVerdict};
pub use sentence::{ContentType, SentenceType, SentenceUnit};
pub use session::{ListenMode, SessionContext};

use thiserror::Error;

/// Errors surfaced by domain types and provider ports.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{provider} provider error: {message}")]
    Provider { provider: String, message: String },

    #[error("provider timeout after {0}s")]
    ProviderTimeout(u64),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Shorthand for a provider-scoped error.
    pub fn provider(provider: impl Into<String>, message: impl ToString) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.to_string(),
        }
    }
}

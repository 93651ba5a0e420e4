//! Agent Configuration
//!
//! A named binding of system prompt, provider selection, and voice that a
//! device session runs with. Loaded once at session start through the
//! [`crate::ports::config::AgentConfigSource`] port and immutable afterwards
//! except for explicit administrative reloads.

use serde::{Deserialize, Serialize};

/// How user intents are recognized for this agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentMode {
    /// Every final recognition goes straight to dialogue.
    #[default]
    Nointent,
    /// A separate LLM call classifies the intent before dialogue.
    IntentLlm,
    /// Intent recognition happens inline via LLM tool schemas.
    FunctionCall,
}

/// How conversation memory behaves for this agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMode {
    /// No memory queries or saves.
    #[default]
    Nomem,
    /// Session-local memory, summarized at teardown.
    Local,
}

/// Immutable per-session agent binding.
///
/// Every field defaults so a partial payload from the console still yields a
/// runnable agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Identifier in the management console, when one assigned it.
    pub agent_id: Option<String>,
    /// Display name spoken in greetings.
    pub name: String,
    pub system_prompt: String,
    /// Voice id passed to the TTS provider.
    pub voice: String,
    pub intent_mode: IntentMode,
    pub memory_mode: MemoryMode,
    /// Phrases that re-open listening and trigger the greeting.
    pub wakeup_words: Vec<String>,
    /// Phrases that end the session immediately.
    pub exit_commands: Vec<String>,
    pub enable_greeting: bool,
    pub greeting: String,
    /// Seconds without activity before the session is torn down.
    pub idle_timeout_secs: u64,
    /// Maximum tool-call recursion depth per user turn.
    pub max_tool_depth: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: None,
            name: "Voxline".to_string(),
            system_prompt: "You are a friendly voice assistant. Keep answers short; \
                            they will be spoken aloud."
                .to_string(),
            voice: "alloy".to_string(),
            intent_mode: IntentMode::default(),
            memory_mode: MemoryMode::default(),
            wakeup_words: Vec::new(),
            exit_commands: Vec::new(),
            enable_greeting: true,
            greeting: "Hello, I am listening.".to_string(),
            idle_timeout_secs: 120,
            max_tool_depth: 5,
        }
    }
}

impl AgentConfig {
    /// Whether the given recognized text is a configured exit command.
    pub fn is_exit_command(&self, text: &str) -> bool {
        self.exit_commands.iter().any(|c| c == text)
    }

    /// Whether the given text matches a configured wakeup word.
    pub fn is_wakeup_word(&self, text: &str) -> bool {
        self.wakeup_words
            .iter()
            .any(|w| text == w || text.ends_with(w.as_str()))
    }
}

//! Well-known service names
//!
//! String keys under which the engine and the host process register services
//! in the DI container. Both sides must agree on these, so they live in one
//! place.

/// Per-session context instance.
pub const SESSION_CONTEXT: &str = "session_context";
/// Per-session lifecycle manager instance.
pub const LIFECYCLE: &str = "lifecycle";

/// Shared VAD singleton.
pub const VAD: &str = "vad";
/// Session-scoped ASR adapter.
pub const ASR: &str = "asr";
/// Shared TTS provider.
pub const TTS: &str = "tts";
/// Shared LLM provider.
pub const LLM: &str = "llm";
/// Shared intent recognizer.
pub const INTENT: &str = "intent";
/// Session-scoped memory adapter.
pub const MEMORY: &str = "memory";
/// Session-scoped tool dispatcher.
pub const TOOL_HANDLER: &str = "tool_handler";
/// Session-scoped tool table shared by the dispatcher and the device bridge.
pub const TOOL_REGISTRY: &str = "tool_registry";
/// Session-scoped device tool bridge (MCP-capable clients).
pub const MCP_BRIDGE: &str = "mcp_bridge";
/// Process-wide agent configuration source.
pub const AGENT_CONFIG_SOURCE: &str = "agent_config_source";
/// The TTS orchestrator itself, for tools that enqueue audio.
pub const TTS_ORCHESTRATOR: &str = "tts_orchestrator";

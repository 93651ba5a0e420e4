//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use voxline_core::{AgentConfig, IntentMode, MemoryMode};

use crate::constants::{audio, dialogue, protocol, session, timeouts};
use crate::ConfigError;

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub dialogue: DialogueConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub agent: AgentDefaults,

    #[serde(default)]
    pub manager_api: ManagerApiConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP / WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket path devices connect to.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Server-initiated ping interval. 0 disables the heartbeat.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_ws_path() -> String {
    protocol::WS_PATH.to_string()
}
fn default_max_connections() -> usize {
    1000
}
fn default_heartbeat() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            max_connections: default_max_connections(),
            heartbeat_secs: default_heartbeat(),
        }
    }
}

/// Audio front-end configuration (VAD + segmentation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Transport frame duration in milliseconds.
    #[serde(default = "default_frame_duration_ms")]
    pub frame_duration_ms: u64,

    /// Silence that closes a speech segment.
    #[serde(default = "default_silence_window_ms")]
    pub silence_window_ms: u64,

    /// Hard cap on one speech segment.
    #[serde(default = "default_max_segment_ms")]
    pub max_segment_ms: u64,

    /// VAD suppression window after a wakeup response.
    #[serde(default = "default_wake_cooldown_ms")]
    pub wake_cooldown_ms: u64,

    /// Energy above this (dBFS) is voice.
    #[serde(default = "default_vad_threshold_db")]
    pub vad_threshold_db: f32,

    /// Energy below this (dBFS) is silence; in between keeps the last state.
    #[serde(default = "default_vad_threshold_low_db")]
    pub vad_threshold_low_db: f32,

    /// Voted frames inside the sliding window required to call voice.
    #[serde(default = "default_vad_window_frames")]
    pub vad_window_frames: usize,

    /// Frames of pre-roll audio kept before speech starts.
    #[serde(default = "default_preroll_frames")]
    pub preroll_frames: usize,

    /// Forward non-final ASR partials to the client as `stt` frames.
    #[serde(default)]
    pub forward_partials: bool,
}

fn default_sample_rate() -> u32 {
    audio::SAMPLE_RATE
}
fn default_frame_duration_ms() -> u64 {
    audio::FRAME_DURATION_MS
}
fn default_silence_window_ms() -> u64 {
    audio::SILENCE_WINDOW_MS
}
fn default_max_segment_ms() -> u64 {
    audio::MAX_SEGMENT_MS
}
fn default_wake_cooldown_ms() -> u64 {
    audio::WAKE_COOLDOWN_MS
}
fn default_vad_threshold_db() -> f32 {
    -35.0
}
fn default_vad_threshold_low_db() -> f32 {
    -45.0
}
fn default_vad_window_frames() -> usize {
    3
}
fn default_preroll_frames() -> usize {
    audio::PREROLL_FRAMES
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frame_duration_ms: default_frame_duration_ms(),
            silence_window_ms: default_silence_window_ms(),
            max_segment_ms: default_max_segment_ms(),
            wake_cooldown_ms: default_wake_cooldown_ms(),
            vad_threshold_db: default_vad_threshold_db(),
            vad_threshold_low_db: default_vad_threshold_low_db(),
            vad_window_frames: default_vad_window_frames(),
            preroll_frames: default_preroll_frames(),
            forward_partials: false,
        }
    }
}

/// Dialogue loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    /// Maximum tool-call recursion depth per user turn.
    #[serde(default = "default_max_tool_depth")]
    pub max_tool_depth: usize,

    /// Spoken when a provider fails mid-turn.
    #[serde(default = "default_apology_text")]
    pub apology_text: String,
}

fn default_max_tool_depth() -> usize {
    dialogue::MAX_TOOL_DEPTH
}
fn default_apology_text() -> String {
    dialogue::APOLOGY_TEXT.to_string()
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            max_tool_depth: default_max_tool_depth(),
            apology_text: default_apology_text(),
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds without inbound activity before teardown.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Timeout monitor tick.
    #[serde(default = "default_monitor_tick")]
    pub monitor_tick_secs: u64,

    /// Speak a farewell turn instead of cutting silently on idle timeout.
    #[serde(default = "default_true")]
    pub enable_farewell: bool,

    /// Prompt used to generate the farewell.
    #[serde(default = "default_farewell_prompt")]
    pub farewell_prompt: String,
}

fn default_idle_timeout() -> u64 {
    session::IDLE_TIMEOUT_SECS
}
fn default_monitor_tick() -> u64 {
    session::MONITOR_TICK_SECS
}
fn default_farewell_prompt() -> String {
    "Time flew by. Say a short, warm goodbye and end the conversation.".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            monitor_tick_secs: default_monitor_tick(),
            enable_farewell: true,
            farewell_prompt: default_farewell_prompt(),
        }
    }
}

/// Provider endpoints and budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub llm: LlmProviderConfig,

    #[serde(default)]
    pub tts: TtsProviderConfig,

    /// Transcription backend endpoint (segment in, text out).
    #[serde(default = "default_asr_endpoint")]
    pub asr_endpoint: String,
}

fn default_asr_endpoint() -> String {
    "http://127.0.0.1:9010/v1/transcribe".to_string()
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            llm: LlmProviderConfig::default(),
            tts: TtsProviderConfig::default(),
            asr_endpoint: default_asr_endpoint(),
        }
    }
}

/// OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    #[serde(default = "default_llm_base")]
    pub api_base: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_llm_base() -> String {
    "http://127.0.0.1:11434/v1".to_string()
}
fn default_llm_key_env() -> String {
    "VOXLINE_LLM_API_KEY".to_string()
}
fn default_llm_model() -> String {
    "qwen3:4b-instruct".to_string()
}
fn default_max_tokens() -> u32 {
    256
}
fn default_temperature() -> f32 {
    0.7
}
fn default_connect_timeout() -> u64 {
    timeouts::CONNECT_SECS
}
fn default_request_timeout() -> u64 {
    timeouts::REQUEST_SECS
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self {
            api_base: default_llm_base(),
            api_key_env: default_llm_key_env(),
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// HTTP speech synthesis endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsProviderConfig {
    #[serde(default = "default_tts_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_tts_model")]
    pub model: String,

    /// Bytes per outbound audio frame.
    #[serde(default = "default_frame_bytes")]
    pub frame_bytes: usize,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_tts_endpoint() -> String {
    "http://127.0.0.1:9020/v1/audio/speech".to_string()
}
fn default_tts_model() -> String {
    "tts-1".to_string()
}
fn default_frame_bytes() -> usize {
    960
}

impl Default for TtsProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_tts_endpoint(),
            model: default_tts_model(),
            frame_bytes: default_frame_bytes(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Agent binding used when the manager API is absent or unreachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    #[serde(default = "default_agent_name")]
    pub name: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(default)]
    pub intent_mode: IntentMode,

    #[serde(default)]
    pub memory_mode: MemoryMode,

    #[serde(default)]
    pub wakeup_words: Vec<String>,

    #[serde(default)]
    pub exit_commands: Vec<String>,

    #[serde(default = "default_true")]
    pub enable_greeting: bool,

    #[serde(default = "default_greeting")]
    pub greeting: String,

    /// Directory the music playback tool serves files from.
    #[serde(default = "default_music_dir")]
    pub music_dir: String,
}

fn default_agent_name() -> String {
    "Voxline".to_string()
}
fn default_system_prompt() -> String {
    "You are a friendly voice assistant. Keep answers short; they will be spoken aloud."
        .to_string()
}
fn default_voice() -> String {
    "alloy".to_string()
}
fn default_greeting() -> String {
    "Hello, I am listening.".to_string()
}
fn default_music_dir() -> String {
    "assets/music".to_string()
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            system_prompt: default_system_prompt(),
            voice: default_voice(),
            intent_mode: IntentMode::default(),
            memory_mode: MemoryMode::default(),
            wakeup_words: Vec::new(),
            exit_commands: Vec::new(),
            enable_greeting: true,
            greeting: default_greeting(),
            music_dir: default_music_dir(),
        }
    }
}

impl AgentDefaults {
    /// Build the per-session agent binding from these defaults.
    pub fn to_agent_config(&self, idle_timeout_secs: u64, max_tool_depth: usize) -> AgentConfig {
        AgentConfig {
            agent_id: None,
            name: self.name.clone(),
            system_prompt: self.system_prompt.clone(),
            voice: self.voice.clone(),
            intent_mode: self.intent_mode,
            memory_mode: self.memory_mode,
            wakeup_words: self.wakeup_words.clone(),
            exit_commands: self.exit_commands.clone(),
            enable_greeting: self.enable_greeting,
            greeting: self.greeting.clone(),
            idle_timeout_secs,
            max_tool_depth,
        }
    }
}

/// Administrative console endpoint consumed through the config port.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ManagerApiConfig {
    /// Base URL; empty disables remote agent configuration.
    #[serde(default)]
    pub url: Option<String>,

    /// Shared secret for `server` administrative messages and API calls.
    #[serde(default)]
    pub secret: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings after load.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::invalid("server.port", "port cannot be 0"));
        }
        if self.server.max_connections == 0 {
            return Err(ConfigError::invalid(
                "server.max_connections",
                "must be at least 1",
            ));
        }
        if !self.server.ws_path.starts_with('/') {
            return Err(ConfigError::invalid(
                "server.ws_path",
                "must start with '/'",
            ));
        }

        if self.audio.silence_window_ms == 0 {
            return Err(ConfigError::invalid(
                "audio.silence_window_ms",
                "must be positive",
            ));
        }
        if self.audio.max_segment_ms <= self.audio.silence_window_ms {
            return Err(ConfigError::invalid(
                "audio.max_segment_ms",
                "must exceed the silence window",
            ));
        }
        if self.audio.vad_threshold_low_db >= self.audio.vad_threshold_db {
            return Err(ConfigError::invalid(
                "audio.vad_threshold_low_db",
                "low threshold must sit below the high threshold",
            ));
        }
        if self.audio.vad_window_frames == 0 {
            return Err(ConfigError::invalid(
                "audio.vad_window_frames",
                "must be at least 1",
            ));
        }

        if self.dialogue.max_tool_depth == 0 {
            return Err(ConfigError::invalid(
                "dialogue.max_tool_depth",
                "must be at least 1",
            ));
        }

        if self.session.idle_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "session.idle_timeout_secs",
                "must be positive",
            ));
        }
        if self.session.monitor_tick_secs == 0 {
            return Err(ConfigError::invalid(
                "session.monitor_tick_secs",
                "must be positive",
            ));
        }

        Ok(())
    }
}

/// Load settings from files and environment.
///
/// Priority (highest to lowest):
/// 1. Environment variables (`VOXLINE__` prefix, `__` separator)
/// 2. `config/{env}.yaml` (if an environment name is given)
/// 3. `config/default.yaml`
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{env_name}")).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOXLINE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

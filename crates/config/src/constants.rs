//! Centralized Constants
//!
//! Defaults referenced from settings and from the engine; changing one of
//! these changes every consumer.

/// Wire protocol.
pub mod protocol {
    /// WebSocket path devices connect to.
    pub const WS_PATH: &str = "/xiaozhi/v1/";
    /// Query-string marker appended by the MQTT gateway.
    pub const MQTT_GATEWAY_MARKER: &str = "from=mqtt_gateway";
    /// Size of the gateway audio header in bytes.
    pub const MQTT_HEADER_LEN: usize = 16;
}

/// Audio pipeline defaults.
pub mod audio {
    /// Default negotiated codec.
    pub const DEFAULT_FORMAT: &str = "opus";
    pub const SAMPLE_RATE: u32 = 16_000;
    pub const CHANNELS: u8 = 1;
    /// Duration of one transport frame in milliseconds.
    pub const FRAME_DURATION_MS: u64 = 60;
    /// Silence that closes a speech segment.
    pub const SILENCE_WINDOW_MS: u64 = 700;
    /// Hard cap on a single speech segment.
    pub const MAX_SEGMENT_MS: u64 = 15_000;
    /// VAD suppression window after a wakeup response.
    pub const WAKE_COOLDOWN_MS: u64 = 2_000;
    /// Frames of audio kept before speech starts.
    pub const PREROLL_FRAMES: usize = 5;
    /// Frames pre-buffered before pacing kicks in on the way out.
    pub const PREBUFFER_FRAMES: usize = 5;
}

/// Session lifecycle defaults.
pub mod session {
    /// Seconds without inbound activity before teardown.
    pub const IDLE_TIMEOUT_SECS: u64 = 120;
    /// Timeout monitor tick.
    pub const MONITOR_TICK_SECS: u64 = 10;
}

/// Provider call budgets.
pub mod timeouts {
    pub const CONNECT_SECS: u64 = 10;
    pub const REQUEST_SECS: u64 = 30;
}

/// Dialogue defaults.
pub mod dialogue {
    /// Maximum tool-call recursion depth per user turn.
    pub const MAX_TOOL_DEPTH: usize = 5;
    /// Spoken when a provider fails mid-turn.
    pub const APOLOGY_TEXT: &str = "Sorry, I didn't catch that. Could you say it again?";
}

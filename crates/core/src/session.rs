//! Session Context
//!
//! Authoritative per-session state. Plain data with interior mutability:
//! services receive the context by reference and communicate through the
//! event bus, never through back-references held inside the context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde_json::Value;

use crate::agent::AgentConfig;
use crate::conversation::ConversationHistory;

/// Client listening mode, negotiated through `listen` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenMode {
    #[default]
    Auto,
    Manual,
    Realtime,
}

impl ListenMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(Self::Auto),
            "manual" => Some(Self::Manual),
            "realtime" => Some(Self::Realtime),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Realtime => "realtime",
        }
    }
}

/// Per-session state shared by every pipeline stage.
///
/// Flags are atomics and the remaining fields sit behind short-lived locks,
/// so handlers on different tasks can read them at suspension points without
/// holding anything across an await.
pub struct SessionContext {
    /// Opaque unique id, immutable for the session's lifetime.
    pub session_id: String,
    pub device_id: Option<String>,
    pub client_id: Option<String>,
    pub client_ip: String,
    /// Whether the connection arrived through the MQTT gateway, which frames
    /// audio with a 16-byte header in both directions.
    pub from_mqtt_gateway: bool,

    /// Conversation log, append-only while the session lives.
    pub history: Arc<ConversationHistory>,

    audio_format: RwLock<String>,
    features: RwLock<HashMap<String, Value>>,
    welcome_msg: RwLock<Value>,
    agent: RwLock<Arc<AgentConfig>>,

    client_abort: AtomicBool,
    client_is_speaking: AtomicBool,
    listen_mode: RwLock<ListenMode>,
    just_woken_up: AtomicBool,
    wake_resume_pending: AtomicBool,
    client_have_voice: AtomicBool,
    client_voice_stop: AtomicBool,
    last_is_voice: AtomicBool,
    llm_finish_task: AtomicBool,
    close_after_chat: AtomicBool,

    sentence_id: RwLock<Option<String>>,
    current_speaker: RwLock<Option<String>>,
    /// Epoch milliseconds of the last inbound activity (text, or voiced audio).
    last_activity_ms: AtomicU64,

    iot_descriptors: RwLock<HashMap<String, Value>>,
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl SessionContext {
    pub fn new(
        session_id: impl Into<String>,
        device_id: Option<String>,
        client_id: Option<String>,
        client_ip: impl Into<String>,
        from_mqtt_gateway: bool,
        agent: AgentConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            device_id,
            client_id,
            client_ip: client_ip.into(),
            from_mqtt_gateway,
            history: Arc::new(ConversationHistory::new()),
            audio_format: RwLock::new("opus".to_string()),
            features: RwLock::new(HashMap::new()),
            welcome_msg: RwLock::new(Value::Null),
            agent: RwLock::new(Arc::new(agent)),
            client_abort: AtomicBool::new(false),
            client_is_speaking: AtomicBool::new(false),
            listen_mode: RwLock::new(ListenMode::Auto),
            just_woken_up: AtomicBool::new(false),
            wake_resume_pending: AtomicBool::new(false),
            client_have_voice: AtomicBool::new(false),
            client_voice_stop: AtomicBool::new(false),
            last_is_voice: AtomicBool::new(false),
            llm_finish_task: AtomicBool::new(true),
            close_after_chat: AtomicBool::new(false),
            sentence_id: RwLock::new(None),
            current_speaker: RwLock::new(None),
            last_activity_ms: AtomicU64::new(epoch_ms()),
            iot_descriptors: RwLock::new(HashMap::new()),
        }
    }

    // -- agent configuration -------------------------------------------------

    /// Negotiated agent configuration; immutable between hot swaps.
    pub fn agent(&self) -> Arc<AgentConfig> {
        self.agent.read().clone()
    }

    /// Replace the agent configuration (administrative reload).
    pub fn set_agent(&self, agent: AgentConfig) {
        *self.agent.write() = Arc::new(agent);
    }

    // -- hello negotiation ---------------------------------------------------

    pub fn audio_format(&self) -> String {
        self.audio_format.read().clone()
    }

    pub fn set_audio_format(&self, format: impl Into<String>) {
        *self.audio_format.write() = format.into();
    }

    pub fn set_features(&self, features: HashMap<String, Value>) {
        *self.features.write() = features;
    }

    pub fn has_feature(&self, name: &str) -> bool {
        self.features
            .read()
            .get(name)
            .map(|v| v.as_bool().unwrap_or(true))
            .unwrap_or(false)
    }

    pub fn welcome_msg(&self) -> Value {
        self.welcome_msg.read().clone()
    }

    pub fn set_welcome_msg(&self, value: Value) {
        *self.welcome_msg.write() = value;
    }

    // -- live flags ----------------------------------------------------------

    pub fn client_abort(&self) -> bool {
        self.client_abort.load(Ordering::Acquire)
    }

    pub fn set_client_abort(&self, value: bool) {
        self.client_abort.store(value, Ordering::Release);
    }

    pub fn client_is_speaking(&self) -> bool {
        self.client_is_speaking.load(Ordering::Acquire)
    }

    pub fn set_client_is_speaking(&self, value: bool) {
        self.client_is_speaking.store(value, Ordering::Release);
    }

    pub fn listen_mode(&self) -> ListenMode {
        *self.listen_mode.read()
    }

    pub fn set_listen_mode(&self, mode: ListenMode) {
        *self.listen_mode.write() = mode;
    }

    pub fn just_woken_up(&self) -> bool {
        self.just_woken_up.load(Ordering::Acquire)
    }

    pub fn set_just_woken_up(&self, value: bool) {
        self.just_woken_up.store(value, Ordering::Release);
    }

    /// One-shot guard so only a single wake-cooldown task is scheduled.
    pub fn try_claim_wake_resume(&self) -> bool {
        !self.wake_resume_pending.swap(true, Ordering::AcqRel)
    }

    pub fn clear_wake_resume(&self) {
        self.wake_resume_pending.store(false, Ordering::Release);
    }

    pub fn client_have_voice(&self) -> bool {
        self.client_have_voice.load(Ordering::Acquire)
    }

    pub fn set_client_have_voice(&self, value: bool) {
        self.client_have_voice.store(value, Ordering::Release);
    }

    pub fn client_voice_stop(&self) -> bool {
        self.client_voice_stop.load(Ordering::Acquire)
    }

    pub fn set_client_voice_stop(&self, value: bool) {
        self.client_voice_stop.store(value, Ordering::Release);
    }

    pub fn last_is_voice(&self) -> bool {
        self.last_is_voice.load(Ordering::Acquire)
    }

    pub fn set_last_is_voice(&self, value: bool) {
        self.last_is_voice.store(value, Ordering::Release);
    }

    pub fn llm_finish_task(&self) -> bool {
        self.llm_finish_task.load(Ordering::Acquire)
    }

    pub fn set_llm_finish_task(&self, value: bool) {
        self.llm_finish_task.store(value, Ordering::Release);
    }

    pub fn close_after_chat(&self) -> bool {
        self.close_after_chat.load(Ordering::Acquire)
    }

    pub fn set_close_after_chat(&self, value: bool) {
        self.close_after_chat.store(value, Ordering::Release);
    }

    // -- utterance bookkeeping -----------------------------------------------

    pub fn sentence_id(&self) -> Option<String> {
        self.sentence_id.read().clone()
    }

    pub fn set_sentence_id(&self, id: impl Into<String>) {
        *self.sentence_id.write() = Some(id.into());
    }

    pub fn current_speaker(&self) -> Option<String> {
        self.current_speaker.read().clone()
    }

    pub fn set_current_speaker(&self, speaker: Option<String>) {
        *self.current_speaker.write() = speaker;
    }

    // -- activity ------------------------------------------------------------

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Acquire)
    }

    pub fn touch_activity(&self) {
        self.last_activity_ms.store(epoch_ms(), Ordering::Release);
    }

    /// Milliseconds since the last activity.
    pub fn idle_ms(&self) -> u64 {
        epoch_ms().saturating_sub(self.last_activity_ms())
    }

    /// Clear the per-segment VAD flags after a segment is consumed.
    pub fn reset_vad_states(&self) {
        self.set_client_have_voice(false);
        self.set_client_voice_stop(false);
        self.set_last_is_voice(false);
    }

    // -- device state --------------------------------------------------------

    pub fn set_iot_descriptor(&self, name: impl Into<String>, descriptor: Value) {
        self.iot_descriptors.write().insert(name.into(), descriptor);
    }

    pub fn iot_descriptor(&self, name: &str) -> Option<Value> {
        self.iot_descriptors.read().get(name).cloned()
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_id", &self.session_id)
            .field("device_id", &self.device_id)
            .field("client_ip", &self.client_ip)
            .field("listen_mode", &self.listen_mode())
            .field("client_abort", &self.client_abort())
            .field("client_is_speaking", &self.client_is_speaking())
            .finish()
    }
}

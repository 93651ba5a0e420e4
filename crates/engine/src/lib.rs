//! Voxline Engine
//!
//! The per-session realtime interaction engine: connection-facing transport
//! registry, message routing, the typed event bus that decouples pipeline
//! stages, the DI container scoping per-session resources, and the
//! VAD → ASR → Dialogue → TTS services with barge-in and cancellation.

pub mod abort;
pub mod audio;
pub mod bus;
pub mod container;
pub mod dialogue;
pub mod handlers;
pub mod intent;
pub mod lifecycle;
pub mod router;
pub mod services;
pub mod session_manager;
pub mod transport;
pub mod tts;
pub mod wiring;

pub use abort::AbortHandler;
pub use audio::AudioProcessingService;
pub use bus::{EventBus, SubscriptionId};
pub use container::{DIContainer, Scope};
pub use dialogue::DialogueService;
pub use handlers::TextMessageHandler;
pub use intent::IntentService;
pub use lifecycle::{LifecycleManager, LifecycleState};
pub use router::MessageRouter;
pub use session_manager::{SessionManager, SessionMeta};
pub use transport::{Connection, TransportRegistry};
pub use tts::{OutputState, TtsOrchestrator};
pub use wiring::{build_engine, EngineHandles};

use thiserror::Error;

/// Engine errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("service '{0}' is not registered")]
    ServiceNotRegistered(String),

    #[error("service '{name}' has unexpected type")]
    ServiceType { name: String },

    #[error("service '{0}' requires a session id")]
    SessionIdRequired(String),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("session '{0}' lifecycle already stopped")]
    LifecycleStopped(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] voxline_core::CoreError),
}

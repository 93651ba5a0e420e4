//! Event vocabulary
//!
//! Every pipeline stage communicates through these types on the event bus.
//! Events are plain data: they carry the session id and the payload, never
//! references into live services.

use std::any::Any;
use std::fmt;
use std::path::PathBuf;

use crate::sentence::{ContentType, SentenceType};

/// Marker trait for anything published on the event bus.
///
/// The `Any` supertrait lets the bus erase and re-downcast events without
/// the publisher or subscriber knowing about each other.
pub trait Event: Any + Send + Sync + fmt::Debug {
    /// Session this event belongs to.
    fn session_id(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

macro_rules! impl_event {
    ($ty:ty) => {
        impl Event for $ty {
            fn session_id(&self) -> &str {
                &self.session_id
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

/// A new session was accepted and its context registered.
#[derive(Debug, Clone)]
pub struct SessionCreated {
    pub session_id: String,
    pub device_id: Option<String>,
    pub client_ip: String,
}
impl_event!(SessionCreated);

/// The session is being torn down. Subscribers release per-session state.
#[derive(Debug, Clone)]
pub struct SessionDestroying {
    pub session_id: String,
}
impl_event!(SessionDestroying);

/// A raw text frame arrived on the transport. Downstream parses the JSON.
#[derive(Debug, Clone)]
pub struct TextMessageReceived {
    pub session_id: String,
    pub content: String,
}
impl_event!(TextMessageReceived);

/// A binary audio frame arrived, already stripped of any gateway header.
#[derive(Debug, Clone)]
pub struct AudioDataReceived {
    pub session_id: String,
    pub data: Vec<u8>,
    /// Capture timestamp in milliseconds when the gateway supplied one.
    pub timestamp_ms: u64,
}
impl_event!(AudioDataReceived);

/// VAD observed a silence-to-voice transition.
#[derive(Debug, Clone)]
pub struct SpeechDetected {
    pub session_id: String,
}
impl_event!(SpeechDetected);

/// VAD closed the current speech segment.
#[derive(Debug, Clone)]
pub struct SpeechEnded {
    pub session_id: String,
}
impl_event!(SpeechEnded);

/// ASR produced a recognition result.
///
/// Non-final partials must not trigger dialogue.
#[derive(Debug, Clone)]
pub struct TextRecognized {
    pub session_id: String,
    pub text: String,
    pub is_final: bool,
    /// Speaker label when a voiceprint matched.
    pub speaker: Option<String>,
}
impl_event!(TextRecognized);

/// A sentence unit is ready for the TTS orchestrator.
#[derive(Debug, Clone)]
pub struct TtsUnitReady {
    pub session_id: String,
    pub sentence_type: SentenceType,
    pub content_type: ContentType,
    pub text: Option<String>,
    pub file: Option<PathBuf>,
}
impl_event!(TtsUnitReady);

/// Output must stop: barge-in, an explicit client abort, or server teardown.
#[derive(Debug, Clone)]
pub struct AbortRequest {
    pub session_id: String,
    pub reason: String,
}
impl_event!(AbortRequest);

impl AbortRequest {
    pub const USER_INTERRUPT: &'static str = "user_interrupt";
    pub const CLIENT_REQUEST: &'static str = "client_request";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_expose_session_id() {
        let event = TextRecognized {
            session_id: "s1".to_string(),
            text: "hello".to_string(),
            is_final: true,
            speaker: None,
        };
        assert_eq!(event.session_id(), "s1");
        assert!(event.as_any().downcast_ref::<TextRecognized>().is_some());
    }
}

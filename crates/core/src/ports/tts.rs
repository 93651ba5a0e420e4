//! TTS Port

use async_trait::async_trait;

use crate::CoreError;

/// One encoded audio frame ready for the transport.
pub type AudioFrame = Vec<u8>;

/// Speech synthesis.
///
/// Implementations return the utterance as a sequence of transport-sized
/// frames; the orchestrator owns pacing and ordering.
#[async_trait]
pub trait TtsPort: Send + Sync {
    /// Synthesize `text` with the given voice.
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<AudioFrame>, CoreError>;
}

//! ASR Port

use async_trait::async_trait;

use crate::session::SessionContext;
use crate::CoreError;

/// A recognition result.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    /// Non-final partials must not trigger dialogue.
    pub is_final: bool,
    /// Speaker label when a voiceprint matched.
    pub speaker: Option<String>,
}

impl Transcription {
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            speaker: None,
        }
    }
}

/// Streaming speech recognition front-end.
///
/// One instance per session (session DI scope). The adapter owns segment
/// assembly: it buffers frames according to the VAD verdict and yields a
/// final [`Transcription`] when the segment closes.
#[async_trait]
pub trait AsrPort: Send + Sync {
    /// Feed one audio frame together with the VAD verdict for it.
    ///
    /// Returns a transcription when a segment completed, otherwise `None`.
    async fn receive_audio(
        &self,
        context: &SessionContext,
        frame: &[u8],
        have_voice: bool,
    ) -> Result<Option<Transcription>, CoreError>;

    /// Discard any buffered audio (abort, listen-detect).
    async fn clear_buffer(&self);
}

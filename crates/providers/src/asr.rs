//! Segmenting ASR Front-End
//!
//! Session-scoped adapter that assembles speech segments (pre-roll ring
//! while silent, accumulation while voiced) and hands the closed segment to
//! a [`Transcriber`] backend. The VAD drives closure through the context's
//! `client_voice_stop` flag, so manual push-to-talk and automatic
//! segmentation share one path.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use voxline_config::{AudioConfig, ProvidersConfig};
use voxline_core::{AsrPort, CoreError, SessionContext, Transcription};

/// Segment-in, text-out transcription backend.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<Transcription, CoreError>;
}

struct SegmentState {
    preroll: VecDeque<Vec<u8>>,
    segment: Vec<Vec<u8>>,
    collecting: bool,
}

impl SegmentState {
    fn new() -> Self {
        Self {
            preroll: VecDeque::new(),
            segment: Vec::new(),
            collecting: false,
        }
    }

    fn reset(&mut self) {
        self.preroll.clear();
        self.segment.clear();
        self.collecting = false;
    }
}

/// Streaming recognition front-end over a [`Transcriber`].
pub struct SegmentingAsr {
    transcriber: std::sync::Arc<dyn Transcriber>,
    config: AudioConfig,
    state: Mutex<SegmentState>,
}

impl SegmentingAsr {
    pub fn new(transcriber: std::sync::Arc<dyn Transcriber>, config: AudioConfig) -> Self {
        Self {
            transcriber,
            config,
            state: Mutex::new(SegmentState::new()),
        }
    }

    fn max_segment_frames(&self) -> usize {
        (self.config.max_segment_ms / self.config.frame_duration_ms.max(1)) as usize
    }
}

#[async_trait]
impl AsrPort for SegmentingAsr {
    async fn receive_audio(
        &self,
        context: &SessionContext,
        frame: &[u8],
        have_voice: bool,
    ) -> Result<Option<Transcription>, CoreError> {
        let mut state = self.state.lock().await;

        if !state.collecting {
            if have_voice {
                // Segment opens: pull the pre-roll in so the first word is
                // not clipped.
                state.collecting = true;
                let preroll: Vec<Vec<u8>> = state.preroll.drain(..).collect();
                state.segment.extend(preroll);
                state.segment.push(frame.to_vec());
            } else {
                state.preroll.push_back(frame.to_vec());
                while state.preroll.len() > self.config.preroll_frames {
                    state.preroll.pop_front();
                }
                return Ok(None);
            }
        } else {
            state.segment.push(frame.to_vec());
        }

        let over_cap = state.segment.len() >= self.max_segment_frames();
        if !context.client_voice_stop() && !over_cap {
            return Ok(None);
        }

        // Segment closed: assemble and transcribe.
        let audio: Vec<u8> = state.segment.drain(..).flatten().collect();
        state.reset();
        drop(state);

        context.reset_vad_states();

        if audio.is_empty() {
            return Ok(None);
        }

        tracing::debug!(
            session_id = %context.session_id,
            bytes = audio.len(),
            over_cap,
            "speech segment complete"
        );

        let transcription = self.transcriber.transcribe(audio).await?;
        if transcription.text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(transcription))
    }

    async fn clear_buffer(&self) {
        self.state.lock().await.reset();
    }
}

/// HTTP transcription backend: POST the raw segment, get JSON back.
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default)]
    speaker: Option<String>,
}

impl HttpTranscriber {
    pub fn new(config: &ProvidersConfig) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(
                voxline_config::constants::timeouts::CONNECT_SECS,
            ))
            .timeout(std::time::Duration::from_secs(
                voxline_config::constants::timeouts::REQUEST_SECS,
            ))
            .build()
            .map_err(|e| CoreError::provider("asr", e))?;
        Ok(Self {
            client,
            endpoint: config.asr_endpoint.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<Transcription, CoreError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/octet-stream")
            .body(audio)
            .send()
            .await
            .map_err(|e| CoreError::provider("asr", e))?;

        if !response.status().is_success() {
            return Err(CoreError::provider(
                "asr",
                format!("transcription endpoint returned {}", response.status()),
            ));
        }

        let parsed: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| CoreError::provider("asr", e))?;

        Ok(Transcription {
            text: parsed.text,
            is_final: true,
            speaker: parsed.speaker,
        })
    }
}

//! HTTP TTS Adapter
//!
//! Posts text to an OpenAI-style `/audio/speech` endpoint and slices the
//! returned body into transport-sized frames. Local synthesis engines
//! implement the same port out of tree.

use async_trait::async_trait;
use serde_json::json;

use voxline_config::TtsProviderConfig;
use voxline_core::{AudioFrame, CoreError, TtsPort};

pub struct HttpTts {
    client: reqwest::Client,
    config: TtsProviderConfig,
}

impl HttpTts {
    pub fn new(config: TtsProviderConfig) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CoreError::provider("tts", e))?;
        Ok(Self { client, config })
    }

    fn frame(&self, bytes: Vec<u8>) -> Vec<AudioFrame> {
        let frame_bytes = self.config.frame_bytes.max(1);
        bytes.chunks(frame_bytes).map(|c| c.to_vec()).collect()
    }
}

#[async_trait]
impl TtsPort for HttpTts {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<AudioFrame>, CoreError> {
        let body = json!({
            "model": self.config.model,
            "input": text,
            "voice": voice,
            "response_format": "opus",
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::provider("tts", e))?;

        if !response.status().is_success() {
            return Err(CoreError::provider(
                "tts",
                format!("endpoint returned {}", response.status()),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CoreError::provider("tts", e))?;

        tracing::debug!(chars = text.len(), bytes = bytes.len(), "tts synthesized");
        Ok(self.frame(bytes.to_vec()))
    }
}

//! Scripted Test Doubles
//!
//! Deterministic provider implementations for engine and server tests.
//! Compiled into the library so downstream crates can drive the pipeline
//! end to end without network or models.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;

use voxline_core::{
    AudioFrame, ChatMessage, CoreError, LlmChunk, LlmPort, LlmStream, ToolSchema, Transcription,
    TtsPort,
};

use crate::asr::Transcriber;

/// LLM that replays scripted turns and records what it was asked.
pub struct ScriptedLlm {
    turns: Mutex<VecDeque<Vec<LlmChunk>>>,
    /// (message count, tools offered) per call.
    pub calls: Mutex<Vec<(usize, bool)>>,
}

impl ScriptedLlm {
    pub fn with_turns(turns: Vec<Vec<LlmChunk>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Single turn answering with the given text chunks.
    pub fn with_text_chunks(chunks: &[&str]) -> Self {
        Self::with_turns(vec![chunks
            .iter()
            .map(|c| LlmChunk::Text(c.to_string()))
            .collect()])
    }
}

#[async_trait]
impl LlmPort for ScriptedLlm {
    async fn chat_stream(
        &self,
        _session_id: &str,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolSchema>>,
    ) -> Result<LlmStream, CoreError> {
        self.calls.lock().push((messages.len(), tools.is_some()));
        let turn = self
            .turns
            .lock()
            .pop_front()
            .unwrap_or_else(|| vec![LlmChunk::Text("okay".to_string())]);
        let items: Vec<Result<LlmChunk, CoreError>> = turn.into_iter().map(Ok).collect();
        Ok(futures::stream::iter(items).boxed())
    }
}

/// TTS that renders `frames_per_text` identical frames per request.
pub struct ScriptedTts {
    pub frames_per_text: usize,
    /// Texts synthesized, in order.
    pub synthesized: Mutex<Vec<String>>,
}

impl ScriptedTts {
    pub fn new(frames_per_text: usize) -> Self {
        Self {
            frames_per_text,
            synthesized: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TtsPort for ScriptedTts {
    async fn synthesize(&self, text: &str, _voice: &str) -> Result<Vec<AudioFrame>, CoreError> {
        self.synthesized.lock().push(text.to_string());
        let marker = self.synthesized.lock().len() as u8;
        Ok((0..self.frames_per_text)
            .map(|i| vec![marker, i as u8])
            .collect())
    }
}

/// Transcriber that pops scripted texts and records segments.
pub struct ScriptedTranscriber {
    texts: Mutex<VecDeque<String>>,
    segments: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedTranscriber {
    pub fn with_texts(texts: &[&str]) -> Self {
        Self {
            texts: Mutex::new(texts.iter().map(|t| t.to_string()).collect()),
            segments: Mutex::new(Vec::new()),
        }
    }

    /// Segments this transcriber has seen.
    pub fn segments(&self) -> Vec<Vec<u8>> {
        self.segments.lock().clone()
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<Transcription, CoreError> {
        self.segments.lock().push(audio);
        let text = self
            .texts
            .lock()
            .pop_front()
            .unwrap_or_else(|| "".to_string());
        Ok(Transcription::final_text(text))
    }
}

/// Failing providers for the error-path tests.
pub struct FailingLlm;

#[async_trait]
impl LlmPort for FailingLlm {
    async fn chat_stream(
        &self,
        _session_id: &str,
        _messages: Vec<ChatMessage>,
        _tools: Option<Vec<ToolSchema>>,
    ) -> Result<LlmStream, CoreError> {
        Err(CoreError::provider("llm", "scripted failure"))
    }
}

/// Convenience: erase a concrete provider into its port Arc.
pub fn llm_port(llm: impl LlmPort + 'static) -> Arc<dyn LlmPort> {
    Arc::new(llm)
}

pub fn tts_port(tts: impl TtsPort + 'static) -> Arc<dyn TtsPort> {
    Arc::new(tts)
}

//! Voxline Providers
//!
//! Reference adapters behind the core ports: an energy-based VAD, a
//! segmenting ASR front-end over a pluggable transcription backend, an
//! OpenAI-compatible streaming LLM, an HTTP TTS client, session memory, and
//! an LLM intent classifier. Vendor-specific engines live outside this
//! repository; these adapters are the shapes they plug into.

pub mod asr;
pub mod intent;
pub mod llm;
pub mod memory;
pub mod testing;
pub mod tts;
pub mod vad;

pub use asr::{HttpTranscriber, SegmentingAsr, Transcriber};
pub use intent::LlmIntent;
pub use llm::OpenAiCompatLlm;
pub use memory::{MemoryStore, NoMemory, SessionMemory};
pub use tts::HttpTts;
pub use vad::EnergyVad;

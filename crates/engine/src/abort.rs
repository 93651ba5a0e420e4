//! Abort Handling
//!
//! One path for every way speech output stops early: barge-in, an explicit
//! client `abort` message, or internal teardown. Sets the abort flag every
//! long loop checks at its suspension points, drains the TTS queue, and
//! returns the output channel to idle with a synthetic `tts stop` when the
//! device was mid-playback. Duplicate requests are idempotent.

use std::sync::Arc;

use voxline_core::{AbortRequest, AsrPort, SessionContext};

use crate::container::DIContainer;
use crate::services;
use crate::tts::TtsOrchestrator;
use crate::EngineError;

pub struct AbortHandler {
    container: Arc<DIContainer>,
    orchestrator: Arc<TtsOrchestrator>,
}

impl AbortHandler {
    pub fn new(container: Arc<DIContainer>, orchestrator: Arc<TtsOrchestrator>) -> Self {
        Self {
            container,
            orchestrator,
        }
    }

    pub async fn handle_abort(&self, event: &AbortRequest) -> Result<(), EngineError> {
        let session_id = event.session_id.as_str();
        tracing::info!(session_id = %session_id, reason = %event.reason, "abort requested");

        let context = self
            .container
            .resolve::<SessionContext>(services::SESSION_CONTEXT, Some(session_id))?;

        // The flag is the cancellation signal for LLM streaming, tool loops,
        // and frame pacing; set it before touching the queues.
        context.set_client_abort(true);

        // Drop pending sentence units and cancel in-flight synthesis. Sends
        // the synthetic stop frame when the channel was speaking.
        self.orchestrator.cleanup(session_id).await;

        // Discard any half-assembled speech segment.
        if let Ok(asr) = self
            .container
            .resolve_port::<dyn AsrPort>(services::ASR, Some(session_id))
        {
            asr.clear_buffer().await;
        }

        context.set_client_is_speaking(false);
        context.set_llm_finish_task(true);

        tracing::debug!(session_id = %session_id, "abort handled");
        Ok(())
    }
}

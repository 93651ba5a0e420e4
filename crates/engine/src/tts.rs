//! TTS Orchestrator
//!
//! Accepts ordered sentence units and drives synthesis so the transport sees
//! audio frames in exactly the order units were enqueued. One worker task per
//! session guarantees FIFO within and across sentence brackets; `cleanup`
//! discards pending units and cancels in-flight synthesis.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::Mutex;
use tokio::sync::Notify;

use voxline_config::Settings;
use voxline_core::{
    ContentType, SentenceType, SentenceUnit, SessionContext, SessionDestroying, TtsPort,
};

use crate::bus::EventBus;
use crate::container::DIContainer;
use crate::lifecycle::LifecycleManager;
use crate::services;
use crate::transport::TransportRegistry;
use crate::EngineError;

/// State of one session's output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Idle,
    Speaking,
    Closing,
}

struct SessionQueue {
    session_id: String,
    queue: Mutex<VecDeque<SentenceUnit>>,
    notify: Notify,
    /// Set by cleanup to stop frame streaming mid-unit.
    cancel_current: AtomicBool,
    state: Mutex<OutputState>,
    /// Bracket accounting: `tts start` / `tts stop` frames sent.
    started: AtomicUsize,
    ended: AtomicUsize,
}

impl SessionQueue {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            cancel_current: AtomicBool::new(false),
            state: Mutex::new(OutputState::Idle),
            started: AtomicUsize::new(0),
            ended: AtomicUsize::new(0),
        }
    }
}

/// Strictly-ordered TTS output pipeline.
pub struct TtsOrchestrator {
    container: Arc<DIContainer>,
    transport: Arc<TransportRegistry>,
    bus: Arc<EventBus>,
    settings: Arc<Settings>,
    sessions: Mutex<HashMap<String, Arc<SessionQueue>>>,
}

impl TtsOrchestrator {
    pub fn new(
        container: Arc<DIContainer>,
        transport: Arc<TransportRegistry>,
        bus: Arc<EventBus>,
        settings: Arc<Settings>,
    ) -> Arc<Self> {
        Arc::new(Self {
            container,
            transport,
            bus,
            settings,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Enqueue one sentence unit for a session.
    ///
    /// The sentence id is taken from the session context, minting a fresh one
    /// when no utterance is open.
    pub async fn add_message(
        self: &Arc<Self>,
        session_id: &str,
        sentence_type: SentenceType,
        content_type: ContentType,
        text: Option<String>,
        file: Option<std::path::PathBuf>,
    ) -> Result<(), EngineError> {
        let context = self
            .container
            .resolve::<SessionContext>(services::SESSION_CONTEXT, Some(session_id))?;

        let sentence_id = match context.sentence_id() {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().simple().to_string();
                context.set_sentence_id(id.clone());
                id
            }
        };

        let unit = SentenceUnit {
            sentence_id,
            sentence_type,
            content_type,
            text,
            file,
        };

        let queue = self.queue_for(session_id)?;
        if sentence_type == SentenceType::First {
            // A fresh bracket clears any cancellation left by an abort.
            queue.cancel_current.store(false, Ordering::Release);
        }
        queue.queue.lock().push_back(unit);
        queue.notify.notify_one();
        Ok(())
    }

    /// Open the sentence bracket.
    pub async fn begin_utterance(self: &Arc<Self>, session_id: &str) -> Result<(), EngineError> {
        self.add_message(session_id, SentenceType::First, ContentType::Action, None, None)
            .await
    }

    /// Stream a text chunk inside the open bracket.
    pub async fn add_text(
        self: &Arc<Self>,
        session_id: &str,
        text: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.add_message(
            session_id,
            SentenceType::Middle,
            ContentType::Text,
            Some(text.into()),
            None,
        )
        .await
    }

    /// Stream a pre-rendered audio file inside the open bracket.
    pub async fn play_file(
        self: &Arc<Self>,
        session_id: &str,
        path: impl Into<std::path::PathBuf>,
    ) -> Result<(), EngineError> {
        self.add_message(
            session_id,
            SentenceType::Middle,
            ContentType::File,
            None,
            Some(path.into()),
        )
        .await
    }

    /// Close the sentence bracket.
    pub async fn end_utterance(self: &Arc<Self>, session_id: &str) -> Result<(), EngineError> {
        self.add_message(session_id, SentenceType::Last, ContentType::Action, None, None)
            .await
    }

    /// Speak one standalone sentence: a full bracket around a single text.
    pub async fn synthesize_one_sentence(
        self: &Arc<Self>,
        session_id: &str,
        text: impl Into<String>,
    ) -> Result<(), EngineError> {
        // Standalone sentences always open a fresh bracket.
        let context = self
            .container
            .resolve::<SessionContext>(services::SESSION_CONTEXT, Some(session_id))?;
        context.set_sentence_id(uuid::Uuid::new_v4().simple().to_string());

        self.begin_utterance(session_id).await?;
        self.add_text(session_id, text).await?;
        self.end_utterance(session_id).await
    }

    /// Discard pending units and cancel in-flight synthesis.
    ///
    /// When the channel was speaking, a synthetic `tts stop` frame is sent so
    /// the client can clean up its playback state, keeping start/stop counts
    /// balanced.
    pub async fn cleanup(&self, session_id: &str) {
        let queue = match self.sessions.lock().get(session_id).cloned() {
            Some(queue) => queue,
            None => return,
        };

        let dropped = {
            let mut pending = queue.queue.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        queue.cancel_current.store(true, Ordering::Release);

        let was_speaking = {
            let mut state = queue.state.lock();
            let speaking = *state == OutputState::Speaking;
            *state = OutputState::Idle;
            speaking
        };

        tracing::debug!(session_id = %session_id, dropped, was_speaking, "tts cleanup");

        if was_speaking {
            queue.ended.fetch_add(1, Ordering::Relaxed);
            if let Ok(context) = self
                .container
                .resolve::<SessionContext>(services::SESSION_CONTEXT, Some(session_id))
            {
                context.set_client_is_speaking(false);
            }
            let frame = serde_json::json!({
                "type": "tts",
                "state": "stop",
                "session_id": session_id,
            });
            if let Err(err) = self.transport.send_json(session_id, &frame).await {
                tracing::debug!(session_id = %session_id, error = %err, "synthetic stop failed");
            }
        }
    }

    /// Drop the session's queue entirely. Called at teardown, after cleanup.
    pub fn release(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }

    /// Bracket counters for one session: (`start` frames, `stop` frames).
    pub fn bracket_counts(&self, session_id: &str) -> (usize, usize) {
        match self.sessions.lock().get(session_id) {
            Some(queue) => (
                queue.started.load(Ordering::Relaxed),
                queue.ended.load(Ordering::Relaxed),
            ),
            None => (0, 0),
        }
    }

    /// Current output-channel state for one session.
    pub fn output_state(&self, session_id: &str) -> OutputState {
        self.sessions
            .lock()
            .get(session_id)
            .map(|q| *q.state.lock())
            .unwrap_or(OutputState::Idle)
    }

    fn queue_for(self: &Arc<Self>, session_id: &str) -> Result<Arc<SessionQueue>, EngineError> {
        let queue = {
            let mut sessions = self.sessions.lock();
            if let Some(queue) = sessions.get(session_id) {
                return Ok(queue.clone());
            }
            let queue = Arc::new(SessionQueue::new(session_id.to_string()));
            sessions.insert(session_id.to_string(), queue.clone());
            queue
        };

        let orchestrator = Arc::clone(self);
        let worker_queue = queue.clone();
        let spawned = self
            .container
            .resolve::<LifecycleManager>(services::LIFECYCLE, Some(session_id))
            .and_then(|lifecycle| {
                lifecycle.create_task(async move {
                    orchestrator.run_worker(worker_queue).await;
                })
            });

        if let Err(err) = spawned {
            // No worker, no queue: leaving the entry would swallow units.
            self.sessions.lock().remove(session_id);
            return Err(err);
        }

        Ok(queue)
    }

    /// Per-session worker: pops units in order and processes them fully
    /// before touching the next one.
    async fn run_worker(self: Arc<Self>, queue: Arc<SessionQueue>) {
        loop {
            let unit = queue.queue.lock().pop_front();
            match unit {
                Some(unit) => {
                    if let Err(err) = self.process_unit(&queue, unit).await {
                        tracing::error!(
                            session_id = %queue.session_id,
                            error = %err,
                            "tts unit failed"
                        );
                    }
                }
                None => queue.notify.notified().await,
            }
        }
    }

    async fn process_unit(
        &self,
        queue: &SessionQueue,
        unit: SentenceUnit,
    ) -> Result<(), EngineError> {
        let session_id = queue.session_id.as_str();
        let context = self
            .container
            .resolve::<SessionContext>(services::SESSION_CONTEXT, Some(session_id))?;

        match (unit.sentence_type, unit.content_type) {
            (SentenceType::First, _) => {
                *queue.state.lock() = OutputState::Speaking;
                queue.started.fetch_add(1, Ordering::Relaxed);
                context.set_client_is_speaking(true);
                self.send_tts_state(session_id, "start", None).await?;
                if let Some(text) = unit.text.as_deref() {
                    self.send_tts_state(session_id, "sentence_start", Some(text))
                        .await?;
                }
            }
            (SentenceType::Last, _) => {
                // Cleanup may have raced us and already closed the bracket.
                let still_speaking = {
                    let mut state = queue.state.lock();
                    let speaking = *state == OutputState::Speaking;
                    if speaking {
                        *state = OutputState::Closing;
                    }
                    speaking
                };
                if still_speaking {
                    queue.ended.fetch_add(1, Ordering::Relaxed);
                    self.send_tts_state(session_id, "stop", None).await?;
                    context.set_client_is_speaking(false);
                    *queue.state.lock() = OutputState::Idle;

                    if context.close_after_chat() {
                        self.bus
                            .publish(SessionDestroying {
                                session_id: session_id.to_string(),
                            })
                            .await;
                    }
                }
            }
            (SentenceType::Middle, ContentType::Text) => {
                let Some(text) = unit.text else { return Ok(()) };
                if text.trim().is_empty() {
                    return Ok(());
                }
                self.send_tts_state(session_id, "sentence_start", Some(&text))
                    .await?;

                let tts = self
                    .container
                    .resolve_port::<dyn TtsPort>(services::TTS, Some(session_id))?;
                let voice = context.agent().voice.clone();
                match tts.synthesize(&text, &voice).await {
                    Ok(frames) => {
                        self.stream_frames(queue, &context, frames).await?;
                    }
                    Err(err) => {
                        tracing::error!(
                            session_id = %session_id,
                            error = %err,
                            "tts synthesis failed"
                        );
                        // The text frame above already carried the sentence, so
                        // the client is not left with a silent gap marker.
                    }
                }
            }
            (SentenceType::Middle, ContentType::File) => {
                let Some(path) = unit.file else { return Ok(()) };
                match tokio::fs::read(&path).await {
                    Ok(bytes) => {
                        let frames = self.frame_file_bytes(bytes);
                        self.stream_frames(queue, &context, frames).await?;
                    }
                    Err(err) => {
                        tracing::error!(
                            session_id = %session_id,
                            path = %path.display(),
                            error = %err,
                            "audio file read failed"
                        );
                    }
                }
            }
            (SentenceType::Middle, ContentType::Action) => {
                // Bracketing marker only; nothing to synthesize.
            }
        }

        Ok(())
    }

    /// Send audio frames in order with simple flow control: a small
    /// pre-buffer, then one frame per frame-duration.
    async fn stream_frames(
        &self,
        queue: &SessionQueue,
        context: &SessionContext,
        frames: Vec<Vec<u8>>,
    ) -> Result<(), EngineError> {
        let session_id = queue.session_id.as_str();
        let frame_duration = Duration::from_millis(self.settings.audio.frame_duration_ms);
        let prebuffer = voxline_config::constants::audio::PREBUFFER_FRAMES;

        for (index, frame) in frames.into_iter().enumerate() {
            if context.client_abort() || queue.cancel_current.load(Ordering::Acquire) {
                tracing::debug!(session_id = %session_id, "frame streaming cancelled");
                break;
            }

            if index >= prebuffer {
                tokio::time::sleep(frame_duration).await;
            }

            context.touch_activity();

            // Clients without binary support take audio in a text envelope.
            if context.has_feature("text_audio") {
                let envelope = serde_json::json!({
                    "type": "audio",
                    "session_id": session_id,
                    "data": BASE64.encode(&frame),
                });
                self.transport.send_json(session_id, &envelope).await?;
                continue;
            }

            let payload = if context.from_mqtt_gateway {
                Self::wrap_gateway_frame(&frame, index as u32, (index as u64 * frame_duration.as_millis() as u64) as u32)
            } else {
                frame
            };
            self.transport.send_binary(session_id, payload).await?;
        }
        Ok(())
    }

    /// Mirror of the inbound gateway layout: version byte, payload length,
    /// sequence, timestamp, payload length again, then audio.
    fn wrap_gateway_frame(frame: &[u8], sequence: u32, timestamp_ms: u32) -> Vec<u8> {
        let mut packet = vec![0u8; 16 + frame.len()];
        packet[0] = 1;
        packet[2..4].copy_from_slice(&(frame.len() as u16).to_be_bytes());
        packet[4..8].copy_from_slice(&sequence.to_be_bytes());
        packet[8..12].copy_from_slice(&timestamp_ms.to_be_bytes());
        packet[12..16].copy_from_slice(&(frame.len() as u32).to_be_bytes());
        packet[16..].copy_from_slice(frame);
        packet
    }

    fn frame_file_bytes(&self, bytes: Vec<u8>) -> Vec<Vec<u8>> {
        let frame_bytes = self.settings.providers.tts.frame_bytes.max(1);
        bytes
            .chunks(frame_bytes)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    async fn send_tts_state(
        &self,
        session_id: &str,
        state: &str,
        text: Option<&str>,
    ) -> Result<(), EngineError> {
        let mut frame = serde_json::json!({
            "type": "tts",
            "state": state,
            "session_id": session_id,
        });
        if let Some(text) = text {
            frame["text"] = serde_json::Value::String(text.to_string());
        }
        self.transport.send_json(session_id, &frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::{CaptureConnection, SentFrame};
    use std::sync::Arc;
    use voxline_core::AgentConfig;
    use voxline_providers::testing::ScriptedTts;

    struct Fixture {
        orchestrator: Arc<TtsOrchestrator>,
        connection: Arc<CaptureConnection>,
        context: Arc<SessionContext>,
    }

    fn fixture() -> Fixture {
        let container = Arc::new(DIContainer::new());
        let bus = Arc::new(EventBus::new());
        let transport = Arc::new(TransportRegistry::new());
        let settings = Arc::new(Settings::default());

        let context = Arc::new(SessionContext::new(
            "s1",
            None,
            None,
            "127.0.0.1",
            false,
            AgentConfig::default(),
        ));
        container.register_session_instance("s1", services::SESSION_CONTEXT, context.clone());
        container.register_session_instance(
            "s1",
            services::LIFECYCLE,
            Arc::new(LifecycleManager::new("s1")),
        );

        let tts: Arc<dyn TtsPort> = Arc::new(ScriptedTts::new(2));
        container.register_instance(services::TTS, DIContainer::port(tts));

        let connection = CaptureConnection::new();
        transport.register("s1", connection.clone());

        let orchestrator = TtsOrchestrator::new(container, transport, bus, settings);
        Fixture {
            orchestrator,
            connection,
            context,
        }
    }

    fn tts_states(connection: &CaptureConnection) -> Vec<String> {
        connection
            .texts()
            .iter()
            .filter_map(|t| serde_json::from_str::<serde_json::Value>(t).ok())
            .filter(|v| v["type"] == "tts")
            .map(|v| v["state"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    async fn wait_for_stops(connection: &CaptureConnection, expected: usize) {
        for _ in 0..100 {
            if tts_states(connection).iter().filter(|s| *s == "stop").count() >= expected {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("expected {expected} stop frames, got {:?}", tts_states(connection));
    }

    #[tokio::test]
    async fn sentences_never_interleave_on_the_wire() {
        let fx = fixture();

        fx.orchestrator
            .synthesize_one_sentence("s1", "first sentence")
            .await
            .unwrap();
        fx.orchestrator
            .synthesize_one_sentence("s1", "second sentence")
            .await
            .unwrap();

        wait_for_stops(&fx.connection, 2).await;

        // Binary frames from the first synthesis (marker 1) all precede the
        // second (marker 2).
        let markers: Vec<u8> = fx
            .connection
            .frames()
            .into_iter()
            .filter_map(|f| match f {
                SentFrame::Binary(data) => data.first().copied(),
                _ => None,
            })
            .collect();
        assert_eq!(markers, vec![1, 1, 2, 2]);

        let states = tts_states(&fx.connection);
        assert_eq!(
            states,
            vec![
                "start",
                "sentence_start",
                "stop",
                "start",
                "sentence_start",
                "stop"
            ]
        );

        let (started, ended) = fx.orchestrator.bracket_counts("s1");
        assert_eq!(started, 2);
        assert_eq!(ended, 2);
    }

    #[tokio::test]
    async fn cleanup_discards_pending_and_emits_synthetic_stop() {
        let fx = fixture();

        fx.context.set_sentence_id("sentence-1");
        fx.orchestrator.begin_utterance("s1").await.unwrap();
        // Give the worker time to open the bracket.
        for _ in 0..100 {
            if fx.orchestrator.output_state("s1") == OutputState::Speaking {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        fx.orchestrator.add_text("s1", "pending text").await.unwrap();
        fx.orchestrator.cleanup("s1").await;

        wait_for_stops(&fx.connection, 1).await;
        assert_eq!(fx.orchestrator.output_state("s1"), OutputState::Idle);
        assert!(!fx.context.client_is_speaking());

        let (started, ended) = fx.orchestrator.bracket_counts("s1");
        assert_eq!(started, ended);
    }

    #[tokio::test]
    async fn action_units_produce_no_audio() {
        let fx = fixture();

        fx.context.set_sentence_id("sentence-1");
        fx.orchestrator.begin_utterance("s1").await.unwrap();
        fx.orchestrator.end_utterance("s1").await.unwrap();

        wait_for_stops(&fx.connection, 1).await;
        let binaries = fx
            .connection
            .frames()
            .into_iter()
            .filter(|f| matches!(f, SentFrame::Binary(_)))
            .count();
        assert_eq!(binaries, 0);
    }

    #[tokio::test]
    async fn close_after_chat_destroys_session_after_last_unit() {
        let fx = fixture();
        fx.context.set_close_after_chat(true);

        let destroyed = Arc::new(parking_lot::Mutex::new(0usize));
        let destroyed_clone = destroyed.clone();
        fx.orchestrator
            .bus
            .subscribe::<SessionDestroying, _>(move |_| *destroyed_clone.lock() += 1);

        fx.orchestrator
            .synthesize_one_sentence("s1", "goodbye")
            .await
            .unwrap();
        wait_for_stops(&fx.connection, 1).await;

        for _ in 0..100 {
            if *destroyed.lock() > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(*destroyed.lock(), 1);
    }
}

//! End-to-end pipeline tests
//!
//! Drive the engine the way the server does — raw frames through the
//! message router — with scripted providers, and observe what a device
//! would receive on the wire.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use voxline_config::Settings;
use voxline_core::{
    AbortRequest, ActionResponse, AgentConfig, AsrPort, ContentType, CoreError, IntentMode,
    LlmChunk, LlmPort, Role, SentenceType, SessionContext, SpeechDetected, SpeechEnded,
    TextRecognized, ToolCallRequest, ToolDispatcher, ToolSchema, TtsPort, TtsUnitReady, VadPort,
};
use voxline_engine::{
    build_engine, services, Connection, DIContainer, EngineError, EngineHandles, EventBus, Scope,
    SessionMeta, TransportRegistry,
};
use voxline_providers::testing::{ScriptedLlm, ScriptedTranscriber, ScriptedTts};
use voxline_providers::{EnergyVad, SegmentingAsr};

/// Connection double that records every frame in send order.
#[derive(Default)]
struct CaptureConnection {
    frames: Mutex<Vec<Frame>>,
}

#[derive(Debug, Clone, PartialEq)]
enum Frame {
    Text(serde_json::Value),
    Binary(Vec<u8>),
    Closed,
}

impl CaptureConnection {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    /// `type`/`state` pairs of the text frames, in order.
    fn control_frames(&self) -> Vec<(String, String)> {
        self.frames()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Text(value) => Some((
                    value["type"].as_str().unwrap_or_default().to_string(),
                    value["state"].as_str().unwrap_or_default().to_string(),
                )),
                _ => None,
            })
            .collect()
    }

    fn binary_count(&self) -> usize {
        self.frames()
            .iter()
            .filter(|f| matches!(f, Frame::Binary(_)))
            .count()
    }
}

#[async_trait]
impl Connection for CaptureConnection {
    async fn send_text(&self, text: String) -> Result<(), EngineError> {
        let value = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
        self.frames.lock().push(Frame::Text(value));
        Ok(())
    }

    async fn send_binary(&self, data: Vec<u8>) -> Result<(), EngineError> {
        self.frames.lock().push(Frame::Binary(data));
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.frames.lock().push(Frame::Closed);
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }
}

struct Harness {
    handles: EngineHandles,
    connection: Arc<CaptureConnection>,
    context: Arc<SessionContext>,
}

impl Harness {
    fn session_id(&self) -> &str {
        &self.context.session_id
    }

    /// Wait until the TTS worker drains: a `tts stop` control frame shows up.
    async fn wait_for_stop(&self) {
        for _ in 0..100 {
            let stops = self
                .connection
                .control_frames()
                .into_iter()
                .filter(|(t, s)| t == "tts" && s == "stop")
                .count();
            if stops > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("tts stop never arrived: {:?}", self.connection.control_frames());
    }
}

async fn harness(
    settings: Settings,
    agent: AgentConfig,
    llm: Arc<dyn LlmPort>,
    configure: impl FnOnce(&Arc<DIContainer>, &Arc<EventBus>, &Arc<TransportRegistry>),
) -> Harness {
    let settings = Arc::new(settings);
    let container = Arc::new(DIContainer::new());
    let bus = Arc::new(EventBus::new());
    let transport = Arc::new(TransportRegistry::new());

    container.register_instance(services::LLM, DIContainer::port(llm));
    let tts: Arc<dyn TtsPort> = Arc::new(ScriptedTts::new(3));
    container.register_instance(services::TTS, DIContainer::port(tts));

    let vad: Arc<dyn VadPort> = Arc::new(EnergyVad::new(settings.audio.clone()));
    container.register_instance(services::VAD, DIContainer::port(vad));

    configure(&container, &bus, &transport);

    let handles = build_engine(container, bus, transport, settings);

    let context = handles
        .session_manager
        .create_session(SessionMeta {
            device_id: Some("dev-1".to_string()),
            client_id: None,
            client_ip: "127.0.0.1".to_string(),
            from_mqtt_gateway: false,
        })
        .await
        .expect("session");
    context.set_agent(agent);

    let connection = CaptureConnection::new();
    handles
        .transport
        .register(&context.session_id, connection.clone());

    Harness {
        handles,
        connection,
        context,
    }
}

/// Register a segmenting ASR fed by a scripted transcriber.
fn scripted_asr(container: &Arc<DIContainer>, settings: &Settings, texts: &'static [&'static str]) {
    let audio = settings.audio.clone();
    container.register_factory(
        services::ASR,
        Scope::Session,
        Arc::new(move |_, _| {
            let asr: Arc<dyn AsrPort> = Arc::new(SegmentingAsr::new(
                Arc::new(ScriptedTranscriber::with_texts(texts)),
                audio.clone(),
            ));
            Ok(DIContainer::port(asr))
        }),
    );
}

/// A loud or silent 16-bit PCM frame.
fn pcm_frame(loud: bool) -> Vec<u8> {
    let value: i16 = if loud { 12_000 } else { 0 };
    let mut frame = Vec::with_capacity(640);
    for i in 0..320 {
        let sample = if i % 2 == 0 { value } else { -value };
        frame.extend_from_slice(&sample.to_le_bytes());
    }
    frame
}

#[tokio::test]
async fn happy_turn_from_audio_to_spoken_answer() {
    let mut settings = Settings::default();
    settings.audio.silence_window_ms = 40;

    let llm = Arc::new(ScriptedLlm::with_text_chunks(&["It is ", "noon."]));
    let harness = {
        let settings_for_asr = settings.clone();
        harness(
            settings,
            AgentConfig::default(),
            llm,
            move |container, _, _| {
                scripted_asr(container, &settings_for_asr, &["what time is it"]);
            },
        )
        .await
    };
    let session_id = harness.session_id().to_string();

    // Hello handshake.
    harness
        .handles
        .router
        .route_text(
            &session_id,
            r#"{"type":"hello","audio_params":{"format":"opus","sample_rate":16000,"channels":1,"frame_duration":60}}"#
                .to_string(),
        )
        .await
        .unwrap();

    // Speech, then enough paced silence to close the segment.
    for _ in 0..6 {
        harness
            .handles
            .router
            .route_binary(&session_id, pcm_frame(true))
            .await
            .unwrap();
    }
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        harness
            .handles
            .router
            .route_binary(&session_id, pcm_frame(false))
            .await
            .unwrap();
    }

    harness.wait_for_stop().await;

    let controls = harness.connection.control_frames();
    assert_eq!(controls[0].0, "hello");

    let stt = controls.iter().find(|(t, _)| t == "stt");
    assert!(stt.is_some(), "stt echo missing: {controls:?}");
    assert!(controls.iter().any(|(t, _)| t == "llm"));

    let tts_states: Vec<&str> = controls
        .iter()
        .filter(|(t, _)| t == "tts")
        .map(|(_, s)| s.as_str())
        .collect();
    assert_eq!(tts_states.first(), Some(&"start"));
    assert_eq!(tts_states.last(), Some(&"stop"));

    // Two text chunks, three frames each.
    assert_eq!(harness.connection.binary_count(), 6);

    let history = harness.context.history.snapshot();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "what time is it");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "It is noon.");
}

#[tokio::test]
async fn speech_events_keep_their_order() {
    let mut settings = Settings::default();
    settings.audio.silence_window_ms = 40;

    let llm = Arc::new(ScriptedLlm::with_text_chunks(&["ok"]));
    let harness = {
        let settings_for_asr = settings.clone();
        harness(
            settings,
            AgentConfig::default(),
            llm,
            move |container, _, _| {
                scripted_asr(container, &settings_for_asr, &["hello"]);
            },
        )
        .await
    };
    let session_id = harness.session_id().to_string();

    let order = Arc::new(Mutex::new(Vec::new()));
    let order_start = order.clone();
    harness
        .handles
        .bus
        .subscribe::<SpeechDetected, _>(move |_| order_start.lock().push("detected"));
    let order_end = order.clone();
    harness
        .handles
        .bus
        .subscribe::<SpeechEnded, _>(move |_| order_end.lock().push("ended"));

    for _ in 0..6 {
        harness
            .handles
            .router
            .route_binary(&session_id, pcm_frame(true))
            .await
            .unwrap();
    }
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        harness
            .handles
            .router
            .route_binary(&session_id, pcm_frame(false))
            .await
            .unwrap();
    }

    let order = order.lock().clone();
    assert_eq!(order.first().map(|s| *s), Some("detected"));
    assert!(order.contains(&"ended"));
    let detected_at = order.iter().position(|s| *s == "detected").unwrap();
    let ended_at = order.iter().position(|s| *s == "ended").unwrap();
    assert!(detected_at < ended_at);
}

/// Dispatcher double for the music scenario: announces the track, then
/// streams the file, all inside the open bracket.
struct MusicDispatcher {
    session_id: String,
    bus: Arc<EventBus>,
    track: std::path::PathBuf,
}

#[async_trait]
impl ToolDispatcher for MusicDispatcher {
    async fn handle_call(&self, call: ToolCallRequest) -> Result<ActionResponse, CoreError> {
        assert_eq!(call.name, "play_music");
        self.bus
            .publish(TtsUnitReady {
                session_id: self.session_id.clone(),
                sentence_type: SentenceType::Middle,
                content_type: ContentType::Text,
                text: Some("Playing jazz.".to_string()),
                file: None,
            })
            .await;
        self.bus
            .publish(TtsUnitReady {
                session_id: self.session_id.clone(),
                sentence_type: SentenceType::Middle,
                content_type: ContentType::File,
                text: None,
                file: Some(self.track.clone()),
            })
            .await;
        Ok(ActionResponse::none())
    }

    fn schemas(&self) -> Vec<ToolSchema> {
        vec![ToolSchema {
            name: "play_music".to_string(),
            description: "Play a song".to_string(),
            parameters: serde_json::json!({"type": "object"}),
        }]
    }

    fn has_tool(&self, name: &str) -> bool {
        name == "play_music"
    }
}

#[tokio::test]
async fn tool_call_turn_plays_announcement_then_file() {
    let track = std::env::temp_dir().join(format!("voxline-test-{}.opus", std::process::id()));
    tokio::fs::write(&track, vec![0xAAu8; 100]).await.unwrap();

    let mut agent = AgentConfig::default();
    agent.intent_mode = IntentMode::FunctionCall;

    let llm = Arc::new(ScriptedLlm::with_turns(vec![vec![LlmChunk::ToolCalls(
        vec![ToolCallRequest {
            id: "call-1".to_string(),
            name: "play_music".to_string(),
            arguments: r#"{"song_name":"jazz"}"#.to_string(),
        }],
    )]]));

    let track_for_harness = track.clone();
    let harness = harness(Settings::default(), agent, llm, move |container, bus, _| {
        let bus = bus.clone();
        let track = track_for_harness.clone();
        container.register_factory(
            services::TOOL_HANDLER,
            Scope::Session,
            Arc::new(move |_, session_id| {
                let dispatcher: Arc<dyn ToolDispatcher> = Arc::new(MusicDispatcher {
                    session_id: session_id.unwrap_or_default().to_string(),
                    bus: bus.clone(),
                    track: track.clone(),
                });
                Ok(DIContainer::port(dispatcher))
            }),
        );
    })
    .await;
    let session_id = harness.session_id().to_string();

    harness
        .handles
        .bus
        .publish(TextRecognized {
            session_id: session_id.clone(),
            text: "play some jazz".to_string(),
            is_final: true,
            speaker: None,
        })
        .await;

    harness.wait_for_stop().await;
    tokio::fs::remove_file(&track).await.ok();

    let controls = harness.connection.control_frames();
    let tts_states: Vec<&str> = controls
        .iter()
        .filter(|(t, _)| t == "tts")
        .map(|(_, s)| s.as_str())
        .collect();
    assert_eq!(tts_states.first(), Some(&"start"));
    assert_eq!(tts_states.last(), Some(&"stop"));
    assert_eq!(tts_states.iter().filter(|s| **s == "stop").count(), 1);

    // Announcement synthesis precedes the raw file bytes on the wire.
    let binaries: Vec<Vec<u8>> = harness
        .connection
        .frames()
        .into_iter()
        .filter_map(|f| match f {
            Frame::Binary(data) => Some(data),
            _ => None,
        })
        .collect();
    let file_at = binaries
        .iter()
        .position(|b| b.iter().all(|byte| *byte == 0xAA))
        .expect("file frame missing");
    assert!(file_at >= 3, "file frame arrived before the announcement");
}

#[tokio::test]
async fn malformed_json_keeps_the_session_alive() {
    let llm = Arc::new(ScriptedLlm::with_text_chunks(&["ok"]));
    let harness = harness(Settings::default(), AgentConfig::default(), llm, |_, _, _| {}).await;
    let session_id = harness.session_id().to_string();

    harness
        .handles
        .router
        .route_text(&session_id, "{not json".to_string())
        .await
        .unwrap();

    assert_eq!(harness.handles.session_manager.session_count(), 1);
    assert!(harness.connection.frames().is_empty());

    // The next frame processes normally.
    harness
        .handles
        .router
        .route_text(&session_id, r#"{"type":"hello"}"#.to_string())
        .await
        .unwrap();
    assert_eq!(harness.connection.control_frames()[0].0, "hello");
}

#[tokio::test]
async fn explicit_abort_drains_and_stops_exactly_once() {
    let llm = Arc::new(ScriptedLlm::with_text_chunks(&["a", "b", "c"]));
    let harness = harness(Settings::default(), AgentConfig::default(), llm, |_, _, _| {}).await;
    let session_id = harness.session_id().to_string();

    // Open a bracket and stream a large file so the worker is mid-flight.
    let track = std::env::temp_dir().join(format!("voxline-abort-{}.opus", std::process::id()));
    tokio::fs::write(&track, vec![0x55u8; 64 * 1024]).await.unwrap();

    harness.context.set_sentence_id("sentence-1");
    harness
        .handles
        .orchestrator
        .begin_utterance(&session_id)
        .await
        .unwrap();
    harness
        .handles
        .orchestrator
        .play_file(&session_id, track.clone())
        .await
        .unwrap();

    // Let playback start, then abort.
    tokio::time::sleep(Duration::from_millis(150)).await;
    harness
        .handles
        .router
        .route_text(&session_id, r#"{"type":"abort"}"#.to_string())
        .await
        .unwrap();

    let frames_at_abort = harness.connection.binary_count();
    tokio::time::sleep(Duration::from_millis(300)).await;
    tokio::fs::remove_file(&track).await.ok();

    // No audio for the aborted sentence after the abort settled.
    let frames_after = harness.connection.binary_count();
    assert!(
        frames_after <= frames_at_abort + 1,
        "audio kept flowing after abort: {frames_at_abort} -> {frames_after}"
    );

    let stops = harness
        .connection
        .control_frames()
        .into_iter()
        .filter(|(t, s)| t == "tts" && s == "stop")
        .count();
    assert_eq!(stops, 1);

    // Idempotent: a second abort adds nothing.
    harness
        .handles
        .router
        .route_text(&session_id, r#"{"type":"abort"}"#.to_string())
        .await
        .unwrap();
    let stops = harness
        .connection
        .control_frames()
        .into_iter()
        .filter(|(t, s)| t == "tts" && s == "stop")
        .count();
    assert_eq!(stops, 1);

    // Bracket accounting stays balanced after the abort.
    let (started, ended) = harness.handles.orchestrator.bracket_counts(&session_id);
    assert_eq!(started, ended);
}

#[tokio::test]
async fn inactivity_destroys_session_and_empties_di_cache() {
    let mut settings = Settings::default();
    settings.session.monitor_tick_secs = 1;
    settings.session.enable_farewell = false;

    let mut agent = AgentConfig::default();
    agent.idle_timeout_secs = 0;

    let llm = Arc::new(ScriptedLlm::with_text_chunks(&["ok"]));
    let harness = harness(settings, agent, llm, |_, _, _| {}).await;
    let session_id = harness.session_id().to_string();

    // Idle past the threshold; the monitor fires within one tick.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(harness.handles.session_manager.session_count(), 0);
    assert_eq!(
        harness.handles.container.session_service_count(&session_id),
        0
    );
}

#[tokio::test]
async fn barge_in_aborts_playback_and_processes_next_turn() {
    let mut settings = Settings::default();
    settings.audio.silence_window_ms = 40;

    let llm = Arc::new(ScriptedLlm::with_turns(vec![
        vec![LlmChunk::Text("the first answer".to_string())],
        vec![LlmChunk::Text("the second answer".to_string())],
    ]));
    let harness = {
        let settings_for_asr = settings.clone();
        harness(
            settings,
            AgentConfig::default(),
            llm,
            move |container, _, _| {
                scripted_asr(container, &settings_for_asr, &["first", "second"]);
            },
        )
        .await
    };
    let session_id = harness.session_id().to_string();

    let aborts = Arc::new(Mutex::new(0usize));
    let aborts_clone = aborts.clone();
    harness
        .handles
        .bus
        .subscribe::<AbortRequest, _>(move |_| *aborts_clone.lock() += 1);

    // Pretend the device is mid-playback when new voice arrives.
    harness.context.set_client_is_speaking(true);
    for _ in 0..6 {
        harness
            .handles
            .router
            .route_binary(&session_id, pcm_frame(true))
            .await
            .unwrap();
    }

    assert!(*aborts.lock() >= 1, "barge-in should publish an abort");
    assert!(harness.context.client_abort() || !harness.context.client_is_speaking());
}

#[tokio::test]
async fn wake_cooldown_clears_after_the_configured_window() {
    let mut settings = Settings::default();
    settings.audio.wake_cooldown_ms = 50;

    let llm = Arc::new(ScriptedLlm::with_text_chunks(&["ok"]));
    let harness = {
        let settings_for_asr = settings.clone();
        harness(
            settings,
            AgentConfig::default(),
            llm,
            move |container, _, _| {
                scripted_asr(container, &settings_for_asr, &["hello"]);
            },
        )
        .await
    };
    let session_id = harness.session_id().to_string();

    harness.context.set_just_woken_up(true);
    harness
        .handles
        .router
        .route_binary(&session_id, pcm_frame(true))
        .await
        .unwrap();
    assert!(harness.context.just_woken_up());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(!harness.context.just_woken_up());
}

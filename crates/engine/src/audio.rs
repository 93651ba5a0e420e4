//! Audio Processing Service
//!
//! Consumes raw audio frames: runs VAD, drives the speech-segmentation
//! transitions, triggers barge-in, forwards frames to the session's ASR
//! adapter, and watches for long silence to start the goodbye flow.

use std::sync::Arc;
use std::time::Duration;

use voxline_config::Settings;
use voxline_core::{
    AbortRequest, AsrPort, AudioDataReceived, ListenMode, SessionContext, SessionDestroying,
    SpeechDetected, SpeechEnded, TextRecognized, VadPort,
};

use crate::bus::EventBus;
use crate::container::DIContainer;
use crate::lifecycle::LifecycleManager;
use crate::services;
use crate::EngineError;

/// VAD + ASR coordination for every session.
pub struct AudioProcessingService {
    container: Arc<DIContainer>,
    bus: Arc<EventBus>,
    settings: Arc<Settings>,
}

impl AudioProcessingService {
    pub fn new(container: Arc<DIContainer>, bus: Arc<EventBus>, settings: Arc<Settings>) -> Self {
        Self {
            container,
            bus,
            settings,
        }
    }

    /// Handle one inbound audio frame.
    pub async fn handle_audio_data(&self, event: &AudioDataReceived) -> Result<(), EngineError> {
        let session_id = event.session_id.as_str();
        let context = self
            .container
            .resolve::<SessionContext>(services::SESSION_CONTEXT, Some(session_id))?;
        let vad = self
            .container
            .resolve_port::<dyn VadPort>(services::VAD, None)?;
        let asr = self
            .container
            .resolve_port::<dyn AsrPort>(services::ASR, Some(session_id))?;

        // Right after a wakeup response the tail of our own audio would
        // re-trigger the VAD; suppress detection for a short cooldown.
        if context.just_woken_up() {
            asr.clear_buffer().await;
            self.schedule_wake_resume(&context)?;
            return Ok(());
        }

        let verdict = match vad.detect(&context, &event.data) {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::error!(session_id = %session_id, error = %err, "vad failed");
                return Ok(());
            }
        };

        // Barge-in: voice while we are speaking aborts playback, except in
        // manual mode where the client controls segmentation explicitly.
        if verdict.is_voice
            && context.client_is_speaking()
            && context.listen_mode() != ListenMode::Manual
        {
            self.bus
                .publish(AbortRequest {
                    session_id: session_id.to_string(),
                    reason: AbortRequest::USER_INTERRUPT.to_string(),
                })
                .await;
        }

        if verdict.segment_start {
            self.bus
                .publish(SpeechDetected {
                    session_id: session_id.to_string(),
                })
                .await;
        }
        if verdict.segment_end {
            self.bus
                .publish(SpeechEnded {
                    session_id: session_id.to_string(),
                })
                .await;
        }

        self.check_idle_goodbye(&context).await;

        match asr.receive_audio(&context, &event.data, verdict.is_voice).await {
            Ok(Some(transcription)) => {
                if transcription.speaker.is_some() {
                    context.set_current_speaker(transcription.speaker.clone());
                }
                self.bus
                    .publish(TextRecognized {
                        session_id: session_id.to_string(),
                        text: transcription.text,
                        is_final: transcription.is_final,
                        speaker: transcription.speaker,
                    })
                    .await;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(session_id = %session_id, error = %err, "asr failed");
            }
        }

        Ok(())
    }

    fn schedule_wake_resume(&self, context: &Arc<SessionContext>) -> Result<(), EngineError> {
        if !context.try_claim_wake_resume() {
            return Ok(());
        }
        let lifecycle = self
            .container
            .resolve::<LifecycleManager>(services::LIFECYCLE, Some(&context.session_id))?;
        let cooldown = Duration::from_millis(self.settings.audio.wake_cooldown_ms);
        let context = context.clone();
        lifecycle.create_task(async move {
            tokio::time::sleep(cooldown).await;
            context.set_just_woken_up(false);
            context.clear_wake_resume();
        })
    }

    /// Long silence handling: mark the session for closure and either speak a
    /// farewell turn or tear down immediately.
    async fn check_idle_goodbye(&self, context: &Arc<SessionContext>) {
        if context.close_after_chat() {
            return;
        }
        let timeout_ms = context.agent().idle_timeout_secs * 1000;
        if context.idle_ms() < timeout_ms {
            return;
        }

        context.set_close_after_chat(true);
        context.set_client_abort(false);

        if self.settings.session.enable_farewell {
            tracing::info!(session_id = %context.session_id, "idle: starting farewell turn");
            self.bus
                .publish(TextRecognized {
                    session_id: context.session_id.clone(),
                    text: self.settings.session.farewell_prompt.clone(),
                    is_final: true,
                    speaker: None,
                })
                .await;
        } else {
            tracing::info!(session_id = %context.session_id, "idle: destroying session");
            self.bus
                .publish(SessionDestroying {
                    session_id: context.session_id.clone(),
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use voxline_core::{AgentConfig, CoreError, Transcription, VadVerdict};

    /// VAD double that replays scripted verdicts.
    struct ScriptedVad {
        verdicts: Mutex<Vec<VadVerdict>>,
    }

    impl VadPort for ScriptedVad {
        fn detect(
            &self,
            _context: &SessionContext,
            _frame: &[u8],
        ) -> Result<VadVerdict, CoreError> {
            Ok(self.verdicts.lock().pop().unwrap_or_default())
        }

        fn release(&self, _session_id: &str) {}
    }

    /// ASR double that yields a final transcription when the verdict says
    /// voice has been seen `trigger_after` times.
    struct ScriptedAsr {
        frames: Mutex<usize>,
        result: Mutex<Option<Transcription>>,
    }

    #[async_trait]
    impl AsrPort for ScriptedAsr {
        async fn receive_audio(
            &self,
            _context: &SessionContext,
            _frame: &[u8],
            _have_voice: bool,
        ) -> Result<Option<Transcription>, CoreError> {
            *self.frames.lock() += 1;
            Ok(self.result.lock().take())
        }

        async fn clear_buffer(&self) {
            *self.frames.lock() = 0;
        }
    }

    struct Fixture {
        service: AudioProcessingService,
        bus: Arc<EventBus>,
        context: Arc<SessionContext>,
    }

    fn fixture(verdicts: Vec<VadVerdict>, transcription: Option<Transcription>) -> Fixture {
        let container = Arc::new(DIContainer::new());
        let bus = Arc::new(EventBus::new());
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

        let vad: Arc<dyn VadPort> = Arc::new(ScriptedVad {
            verdicts: Mutex::new(verdicts),
        });
        container.register_instance(services::VAD, DIContainer::port(vad));

        let asr: Arc<dyn AsrPort> = Arc::new(ScriptedAsr {
            frames: Mutex::new(0),
            result: Mutex::new(transcription),
        });
        container.register_session_instance("s1", services::ASR, DIContainer::port(asr));

        Fixture {
            service: AudioProcessingService::new(container, bus.clone(), settings),
            bus,
            context,
        }
    }

    fn audio(session_id: &str) -> AudioDataReceived {
        AudioDataReceived {
            session_id: session_id.to_string(),
            data: vec![0u8; 120],
            timestamp_ms: 0,
        }
    }

    #[tokio::test]
    async fn voice_while_speaking_triggers_barge_in() {
        let fx = fixture(
            vec![VadVerdict {
                is_voice: true,
                segment_start: true,
                segment_end: false,
            }],
            None,
        );
        fx.context.set_client_is_speaking(true);

        let aborts = Arc::new(Mutex::new(Vec::new()));
        let aborts_clone = aborts.clone();
        fx.bus.subscribe::<AbortRequest, _>(move |event| {
            aborts_clone.lock().push(event.reason.clone());
        });

        fx.service.handle_audio_data(&audio("s1")).await.unwrap();
        assert_eq!(*aborts.lock(), vec!["user_interrupt".to_string()]);
    }

    #[tokio::test]
    async fn manual_mode_never_barges_in() {
        let fx = fixture(
            vec![VadVerdict {
                is_voice: true,
                segment_start: true,
                segment_end: false,
            }],
            None,
        );
        fx.context.set_client_is_speaking(true);
        fx.context.set_listen_mode(ListenMode::Manual);

        let aborts = Arc::new(Mutex::new(0usize));
        let aborts_clone = aborts.clone();
        fx.bus.subscribe::<AbortRequest, _>(move |_| {
            *aborts_clone.lock() += 1;
        });

        fx.service.handle_audio_data(&audio("s1")).await.unwrap();
        assert_eq!(*aborts.lock(), 0);
    }

    #[tokio::test]
    async fn final_transcription_publishes_text_recognized() {
        let fx = fixture(
            vec![VadVerdict {
                is_voice: false,
                segment_start: false,
                segment_end: true,
            }],
            Some(Transcription::final_text("what time is it")),
        );

        let texts = Arc::new(Mutex::new(Vec::new()));
        let texts_clone = texts.clone();
        fx.bus.subscribe::<TextRecognized, _>(move |event| {
            texts_clone.lock().push((event.text.clone(), event.is_final));
        });

        fx.service.handle_audio_data(&audio("s1")).await.unwrap();
        assert_eq!(
            *texts.lock(),
            vec![("what time is it".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn segment_transitions_publish_speech_events() {
        let fx = fixture(
            vec![VadVerdict {
                is_voice: true,
                segment_start: true,
                segment_end: false,
            }],
            None,
        );

        let detected = Arc::new(Mutex::new(0usize));
        let detected_clone = detected.clone();
        fx.bus.subscribe::<SpeechDetected, _>(move |_| {
            *detected_clone.lock() += 1;
        });

        fx.service.handle_audio_data(&audio("s1")).await.unwrap();
        assert_eq!(*detected.lock(), 1);
    }

    #[tokio::test]
    async fn wake_cooldown_suppresses_vad() {
        let fx = fixture(
            vec![VadVerdict {
                is_voice: true,
                segment_start: true,
                segment_end: false,
            }],
            None,
        );
        fx.context.set_just_woken_up(true);

        let detected = Arc::new(Mutex::new(0usize));
        let detected_clone = detected.clone();
        fx.bus.subscribe::<SpeechDetected, _>(move |_| {
            *detected_clone.lock() += 1;
        });

        fx.service.handle_audio_data(&audio("s1")).await.unwrap();
        assert_eq!(*detected.lock(), 0);
        assert!(fx.context.just_woken_up());
    }

    #[tokio::test]
    async fn idle_session_starts_farewell_turn() {
        let fx = fixture(
            vec![VadVerdict::default(), VadVerdict::default()],
            None,
        );
        // Shrink the idle budget so the next frame crosses it.
        let mut agent = fx.context.agent().as_ref().clone();
        agent.idle_timeout_secs = 0;
        fx.context.set_agent(agent);

        let texts = Arc::new(Mutex::new(Vec::new()));
        let texts_clone = texts.clone();
        fx.bus.subscribe::<TextRecognized, _>(move |event| {
            texts_clone.lock().push(event.text.clone());
        });

        fx.service.handle_audio_data(&audio("s1")).await.unwrap();
        assert!(fx.context.close_after_chat());
        assert_eq!(texts.lock().len(), 1);

        // Second frame must not start a second farewell.
        fx.service.handle_audio_data(&audio("s1")).await.unwrap();
        assert_eq!(texts.lock().len(), 1);
    }
}

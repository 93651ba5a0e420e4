//! Engine Wiring
//!
//! Builds the pipeline services and subscribes them to the event bus. The
//! host process registers providers in the container, calls `build_engine`,
//! and from then on everything flows through events.

use std::sync::Arc;

use voxline_config::Settings;
use voxline_core::{
    AbortRequest, AudioDataReceived, SessionDestroying, TextMessageReceived, TextRecognized,
    TtsUnitReady, VadPort,
};

use crate::abort::AbortHandler;
use crate::audio::AudioProcessingService;
use crate::bus::EventBus;
use crate::container::DIContainer;
use crate::dialogue::DialogueService;
use crate::handlers::TextMessageHandler;
use crate::intent::IntentService;
use crate::router::MessageRouter;
use crate::services;
use crate::session_manager::SessionManager;
use crate::transport::TransportRegistry;
use crate::tts::TtsOrchestrator;

/// Everything the host needs to run the engine.
pub struct EngineHandles {
    pub container: Arc<DIContainer>,
    pub bus: Arc<EventBus>,
    pub transport: Arc<TransportRegistry>,
    pub session_manager: Arc<SessionManager>,
    pub router: Arc<MessageRouter>,
    pub orchestrator: Arc<TtsOrchestrator>,
    pub dialogue: Arc<DialogueService>,
    pub intent: Arc<IntentService>,
}

/// Construct the services and subscribe every pipeline stage to the bus.
pub fn build_engine(
    container: Arc<DIContainer>,
    bus: Arc<EventBus>,
    transport: Arc<TransportRegistry>,
    settings: Arc<Settings>,
) -> EngineHandles {
    let session_manager = SessionManager::new(
        container.clone(),
        bus.clone(),
        transport.clone(),
        settings.clone(),
    );
    let router = Arc::new(MessageRouter::new(container.clone(), bus.clone()));
    let orchestrator = TtsOrchestrator::new(
        container.clone(),
        transport.clone(),
        bus.clone(),
        settings.clone(),
    );
    let intent = IntentService::new(
        container.clone(),
        bus.clone(),
        transport.clone(),
        orchestrator.clone(),
    );
    let dialogue = DialogueService::new(
        container.clone(),
        bus.clone(),
        transport.clone(),
        intent.clone(),
        settings.clone(),
    );
    let audio = Arc::new(AudioProcessingService::new(
        container.clone(),
        bus.clone(),
        settings.clone(),
    ));
    let abort = Arc::new(AbortHandler::new(container.clone(), orchestrator.clone()));
    let text_handler = Arc::new(TextMessageHandler::new(
        container.clone(),
        bus.clone(),
        transport.clone(),
        settings.clone(),
    ));

    // Inbound frames.
    {
        let audio = audio.clone();
        bus.subscribe_async::<AudioDataReceived, _, _>(move |event| {
            let audio = audio.clone();
            async move {
                if let Err(err) = audio.handle_audio_data(&event).await {
                    tracing::error!(session_id = %event.session_id, error = %err, "audio handling failed");
                }
            }
        });
    }
    {
        let text_handler = text_handler.clone();
        bus.subscribe_async::<TextMessageReceived, _, _>(move |event| {
            let text_handler = text_handler.clone();
            async move {
                if let Err(err) = text_handler.handle(&event).await {
                    tracing::error!(session_id = %event.session_id, error = %err, "text handling failed");
                }
            }
        });
    }

    // Recognition → dialogue. A missing provider is a configuration error
    // and fatal for the session; everything else is a degraded turn.
    {
        let dialogue = dialogue.clone();
        let bus_for_dialogue = bus.clone();
        let transport_for_dialogue = transport.clone();
        bus.subscribe_async::<TextRecognized, _, _>(move |event| {
            let dialogue = dialogue.clone();
            let bus = bus_for_dialogue.clone();
            let transport = transport_for_dialogue.clone();
            async move {
                match dialogue.handle_text_recognized(&event).await {
                    Ok(()) => {}
                    Err(
                        err @ (crate::EngineError::ServiceNotRegistered(_)
                        | crate::EngineError::ServiceType { .. }),
                    ) => {
                        tracing::error!(
                            session_id = %event.session_id,
                            error = %err,
                            "fatal configuration error, closing session"
                        );
                        let diagnostic = serde_json::json!({
                            "type": "server",
                            "status": "error",
                            "message": err.to_string(),
                        });
                        let _ = transport.send_json(&event.session_id, &diagnostic).await;
                        bus.publish(SessionDestroying {
                            session_id: event.session_id.clone(),
                        })
                        .await;
                    }
                    Err(err) => {
                        tracing::error!(session_id = %event.session_id, error = %err, "dialogue turn failed");
                    }
                }
            }
        });
    }

    // Dialogue → TTS.
    {
        let orchestrator = orchestrator.clone();
        bus.subscribe_async::<TtsUnitReady, _, _>(move |event| {
            let orchestrator = orchestrator.clone();
            async move {
                if let Err(err) = orchestrator
                    .add_message(
                        &event.session_id,
                        event.sentence_type,
                        event.content_type,
                        event.text.clone(),
                        event.file.clone(),
                    )
                    .await
                {
                    tracing::error!(session_id = %event.session_id, error = %err, "tts enqueue failed");
                }
            }
        });
    }

    // Interruption.
    {
        let abort = abort.clone();
        bus.subscribe_async::<AbortRequest, _, _>(move |event| {
            let abort = abort.clone();
            async move {
                if let Err(err) = abort.handle_abort(&event).await {
                    tracing::error!(session_id = %event.session_id, error = %err, "abort handling failed");
                }
            }
        });
    }

    // Teardown: release per-session pipeline state, then destroy. The
    // destroy itself is idempotent, so the re-publication from inside
    // `destroy_session` lands on an already-claimed entry.
    {
        let orchestrator = orchestrator.clone();
        let container = container.clone();
        let session_manager = session_manager.clone();
        bus.subscribe_async::<SessionDestroying, _, _>(move |event| {
            let orchestrator = orchestrator.clone();
            let container = container.clone();
            let session_manager = session_manager.clone();
            async move {
                orchestrator.cleanup(&event.session_id).await;
                orchestrator.release(&event.session_id);
                if let Ok(vad) = container.resolve_port::<dyn VadPort>(services::VAD, None) {
                    vad.release(&event.session_id);
                }
                session_manager.destroy_session(&event.session_id).await;
            }
        });
    }

    EngineHandles {
        container,
        bus,
        transport,
        session_manager,
        router,
        orchestrator,
        dialogue,
        intent,
    }
}

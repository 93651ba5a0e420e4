//! Provider Registration
//!
//! Wires the reference provider adapters and the tool stack into the DI
//! container. A deployment swapping in vendor engines replaces exactly this
//! module.

use std::path::PathBuf;
use std::sync::Arc;

use voxline_config::Settings;
use voxline_core::{
    AgentConfigSource, AsrPort, DeviceToolBridge, IntentPort, LlmPort, MemoryMode, MemoryPort,
    SessionContext, ToolDispatcher, TtsPort, VadPort,
};
use voxline_engine::{services, DIContainer, EngineError, Scope, TransportRegistry};
use voxline_providers::{
    EnergyVad, HttpTranscriber, HttpTts, LlmIntent, MemoryStore, NoMemory, OpenAiCompatLlm,
    SegmentingAsr, SessionMemory, Transcriber,
};
use voxline_tools::{builtin::register_builtin_tools, McpBridge, ToolHandler, ToolRegistry};
use voxline_tools::registry::SystemContext;

use crate::ServerError;

/// Register every provider and tool factory the engine resolves at runtime.
pub fn register_providers(
    container: &Arc<DIContainer>,
    bus: &Arc<voxline_engine::EventBus>,
    transport: &Arc<TransportRegistry>,
    settings: &Arc<Settings>,
) -> Result<(), ServerError> {
    // Shared singletons.
    let vad: Arc<dyn VadPort> = Arc::new(EnergyVad::new(settings.audio.clone()));
    container.register_instance(services::VAD, DIContainer::port(vad));

    let llm: Arc<dyn LlmPort> = Arc::new(OpenAiCompatLlm::new(settings.providers.llm.clone())?);
    container.register_instance(services::LLM, DIContainer::port(llm.clone()));

    let tts: Arc<dyn TtsPort> = Arc::new(HttpTts::new(settings.providers.tts.clone())?);
    container.register_instance(services::TTS, DIContainer::port(tts));

    // Intent classification reuses the chat LLM and the built-in tool list.
    let schema_registry = ToolRegistry::new();
    register_builtin_tools(&schema_registry, PathBuf::from(&settings.agent.music_dir));
    let intent: Arc<dyn IntentPort> = Arc::new(LlmIntent::new(llm, schema_registry.schemas()));
    container.register_instance(services::INTENT, DIContainer::port(intent));

    // Agent configuration: console when configured, settings otherwise.
    let config_source: Arc<dyn AgentConfigSource> = match &settings.manager_api.url {
        Some(url) if !url.is_empty() => Arc::new(crate::agent_api::HttpAgentConfigSource::new(
            settings, url.clone(),
        )?),
        _ => Arc::new(crate::agent_api::StaticAgentConfigSource::new(settings)),
    };
    container.register_instance(
        services::AGENT_CONFIG_SOURCE,
        DIContainer::port(config_source),
    );

    // Session-scoped ASR over a shared transcription backend.
    let transcriber: Arc<dyn Transcriber> =
        Arc::new(HttpTranscriber::new(&settings.providers)?);
    let audio_config = settings.audio.clone();
    container.register_factory(
        services::ASR,
        Scope::Session,
        Arc::new(move |_, _| {
            let asr: Arc<dyn AsrPort> =
                Arc::new(SegmentingAsr::new(transcriber.clone(), audio_config.clone()));
            Ok(DIContainer::port(asr))
        }),
    );

    // Session-scoped memory, mode chosen by the agent binding.
    let memory_store = MemoryStore::new();
    container.register_factory(
        services::MEMORY,
        Scope::Session,
        Arc::new(move |container, session_id| {
            let session_id = session_id
                .ok_or_else(|| EngineError::SessionIdRequired(services::MEMORY.to_string()))?;
            let context =
                container.resolve::<SessionContext>(services::SESSION_CONTEXT, Some(session_id))?;
            let memory: Arc<dyn MemoryPort> = match context.agent().memory_mode {
                MemoryMode::Local => {
                    let key = context
                        .device_id
                        .clone()
                        .unwrap_or_else(|| session_id.to_string());
                    Arc::new(SessionMemory::new(key, memory_store.clone()))
                }
                MemoryMode::Nomem => Arc::new(NoMemory),
            };
            Ok(DIContainer::port(memory))
        }),
    );

    // Session-scoped tool table, shared by the dispatcher and the device
    // bridge.
    let music_dir = PathBuf::from(&settings.agent.music_dir);
    container.register_factory(
        services::TOOL_REGISTRY,
        Scope::Session,
        Arc::new(move |_, _| {
            let registry = Arc::new(ToolRegistry::new());
            register_builtin_tools(&registry, music_dir.clone());
            Ok(registry)
        }),
    );

    let handler_container = container.clone();
    let handler_bus = bus.clone();
    container.register_factory(
        services::TOOL_HANDLER,
        Scope::Session,
        Arc::new(move |container, session_id| {
            let session_id = session_id.ok_or_else(|| {
                EngineError::SessionIdRequired(services::TOOL_HANDLER.to_string())
            })?;
            let registry =
                container.resolve::<ToolRegistry>(services::TOOL_REGISTRY, Some(session_id))?;
            let dispatcher: Arc<dyn ToolDispatcher> = Arc::new(ToolHandler::new(
                registry,
                SystemContext {
                    session_id: session_id.to_string(),
                    container: handler_container.clone(),
                    bus: handler_bus.clone(),
                },
            ));
            Ok(DIContainer::port(dispatcher))
        }),
    );

    let bridge_transport = transport.clone();
    container.register_factory(
        services::MCP_BRIDGE,
        Scope::Session,
        Arc::new(move |container, session_id| {
            let session_id = session_id
                .ok_or_else(|| EngineError::SessionIdRequired(services::MCP_BRIDGE.to_string()))?;
            let registry =
                container.resolve::<ToolRegistry>(services::TOOL_REGISTRY, Some(session_id))?;
            let bridge: Arc<dyn DeviceToolBridge> = Arc::new(McpBridge::new(
                session_id,
                bridge_transport.clone(),
                registry,
            ));
            Ok(DIContainer::port(bridge))
        }),
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxline_engine::EventBus;

    #[tokio::test]
    async fn all_engine_services_are_registered() {
        let container = Arc::new(DIContainer::new());
        let bus = Arc::new(EventBus::new());
        let transport = Arc::new(TransportRegistry::new());
        let settings = Arc::new(Settings::default());

        register_providers(&container, &bus, &transport, &settings).unwrap();

        for name in [
            services::VAD,
            services::LLM,
            services::TTS,
            services::INTENT,
            services::AGENT_CONFIG_SOURCE,
            services::ASR,
            services::MEMORY,
            services::TOOL_REGISTRY,
            services::TOOL_HANDLER,
            services::MCP_BRIDGE,
        ] {
            assert!(container.has_service(name), "{name} missing");
        }
    }

    #[tokio::test]
    async fn tool_handler_and_bridge_share_one_registry() {
        let container = Arc::new(DIContainer::new());
        let bus = Arc::new(EventBus::new());
        let transport = Arc::new(TransportRegistry::new());
        let settings = Arc::new(Settings::default());
        register_providers(&container, &bus, &transport, &settings).unwrap();

        // Session context is normally placed by the session manager.
        let context = Arc::new(SessionContext::new(
            "s1",
            None,
            None,
            "127.0.0.1",
            false,
            voxline_core::AgentConfig::default(),
        ));
        container.register_session_instance("s1", services::SESSION_CONTEXT, context);

        let dispatcher = container
            .resolve_port::<dyn ToolDispatcher>(services::TOOL_HANDLER, Some("s1"))
            .unwrap();
        let _bridge = container
            .resolve_port::<dyn DeviceToolBridge>(services::MCP_BRIDGE, Some("s1"))
            .unwrap();

        // Built-ins visible through the dispatcher.
        assert!(dispatcher.has_tool("play_music"));
        assert!(dispatcher.has_tool("get_current_time"));
        assert!(dispatcher.has_tool("end_session"));
    }
}

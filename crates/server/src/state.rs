//! Application State
//!
//! Shared handles across HTTP and WebSocket handlers.

use std::sync::Arc;

use voxline_config::Settings;
use voxline_engine::{
    DIContainer, EngineHandles, EventBus, MessageRouter, SessionManager, TransportRegistry,
    TtsOrchestrator,
};

/// Everything a request handler needs.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub container: Arc<DIContainer>,
    pub bus: Arc<EventBus>,
    pub transport: Arc<TransportRegistry>,
    pub session_manager: Arc<SessionManager>,
    pub router: Arc<MessageRouter>,
    pub orchestrator: Arc<TtsOrchestrator>,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, handles: EngineHandles) -> Self {
        Self {
            settings,
            container: handles.container,
            bus: handles.bus,
            transport: handles.transport,
            session_manager: handles.session_manager,
            router: handles.router,
            orchestrator: handles.orchestrator,
        }
    }
}

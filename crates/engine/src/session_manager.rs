//! Session Manager
//!
//! Creates and destroys sessions: builds the context and lifecycle pair,
//! registers them in the container, emits lifecycle events, and enforces the
//! inactivity timeout with a per-session monitor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use uuid::Uuid;

use voxline_config::Settings;
use voxline_core::{
    AgentConfig, AgentConfigSource, MemoryPort, SessionContext, SessionCreated, SessionDestroying,
};

use crate::bus::EventBus;
use crate::container::DIContainer;
use crate::lifecycle::LifecycleManager;
use crate::services;
use crate::transport::TransportRegistry;
use crate::EngineError;

/// Connection facts known at accept time.
#[derive(Debug, Clone, Default)]
pub struct SessionMeta {
    pub device_id: Option<String>,
    pub client_id: Option<String>,
    pub client_ip: String,
    pub from_mqtt_gateway: bool,
}

struct SessionEntry {
    context: Arc<SessionContext>,
    lifecycle: Arc<LifecycleManager>,
}

/// Owns the session table and the per-session timeout monitors.
pub struct SessionManager {
    container: Arc<DIContainer>,
    bus: Arc<EventBus>,
    transport: Arc<TransportRegistry>,
    settings: Arc<Settings>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionManager {
    pub fn new(
        container: Arc<DIContainer>,
        bus: Arc<EventBus>,
        transport: Arc<TransportRegistry>,
        settings: Arc<Settings>,
    ) -> Arc<Self> {
        Arc::new(Self {
            container,
            bus,
            transport,
            settings,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Accept a new connection: build context + lifecycle, register both in
    /// the container, publish `SessionCreated`, and start the timeout
    /// monitor. Returns the new session's context.
    pub async fn create_session(
        self: &Arc<Self>,
        meta: SessionMeta,
    ) -> Result<Arc<SessionContext>, EngineError> {
        if self.sessions.read().len() >= self.settings.server.max_connections {
            return Err(EngineError::Transport("max sessions reached".to_string()));
        }

        let session_id = Uuid::new_v4().to_string();
        let agent = self.load_agent_config(meta.device_id.as_deref()).await;

        tracing::info!(
            session_id = %session_id,
            device_id = meta.device_id.as_deref().unwrap_or("-"),
            client_ip = %meta.client_ip,
            from_mqtt = meta.from_mqtt_gateway,
            "creating session"
        );

        let context = Arc::new(SessionContext::new(
            session_id.clone(),
            meta.device_id.clone(),
            meta.client_id.clone(),
            meta.client_ip.clone(),
            meta.from_mqtt_gateway,
            agent,
        ));
        context.set_welcome_msg(serde_json::json!({
            "type": "hello",
            "version": 1,
            "transport": "websocket",
            "session_id": session_id,
        }));

        let lifecycle = Arc::new(LifecycleManager::new(session_id.clone()));

        self.container.register_session_instance(
            &session_id,
            services::SESSION_CONTEXT,
            context.clone(),
        );
        self.container.register_session_instance(
            &session_id,
            services::LIFECYCLE,
            lifecycle.clone(),
        );

        self.sessions.write().insert(
            session_id.clone(),
            SessionEntry {
                context: context.clone(),
                lifecycle: lifecycle.clone(),
            },
        );

        self.bus
            .publish(SessionCreated {
                session_id: session_id.clone(),
                device_id: meta.device_id,
                client_ip: meta.client_ip,
            })
            .await;

        self.spawn_timeout_monitor(context.clone(), lifecycle);

        Ok(context)
    }

    async fn load_agent_config(&self, device_id: Option<&str>) -> AgentConfig {
        match self
            .container
            .resolve_port::<dyn AgentConfigSource>(services::AGENT_CONFIG_SOURCE, None)
        {
            Ok(source) => match source.fetch(device_id).await {
                Ok(agent) => agent,
                Err(err) => {
                    tracing::warn!(
                        device_id = device_id.unwrap_or("-"),
                        error = %err,
                        "agent config fetch failed, using defaults"
                    );
                    self.default_agent_config()
                }
            },
            Err(_) => self.default_agent_config(),
        }
    }

    fn default_agent_config(&self) -> AgentConfig {
        self.settings.agent.to_agent_config(
            self.settings.session.idle_timeout_secs,
            self.settings.dialogue.max_tool_depth,
        )
    }

    /// Tear a session down. Idempotent: the first caller claims the entry,
    /// later callers (including the `SessionDestroying` subscriber) are
    /// no-ops.
    pub async fn destroy_session(&self, session_id: &str) {
        let entry = match self.sessions.write().remove(session_id) {
            Some(entry) => entry,
            None => return,
        };

        tracing::info!(session_id = %session_id, "destroying session");

        // Notify subscribers while the session services are still resolvable.
        self.bus
            .publish(SessionDestroying {
                session_id: session_id.to_string(),
            })
            .await;

        self.save_memory(session_id, &entry.context).await;

        entry.lifecycle.stop().await;

        self.container.cleanup_session(session_id);

        if let Err(err) = self.transport.close(session_id).await {
            tracing::debug!(session_id = %session_id, error = %err, "close after teardown failed");
        }
        self.transport.unregister(session_id);

        tracing::info!(session_id = %session_id, "session destroyed");
    }

    /// Summarize the conversation through the memory port before the session
    /// cache is dropped.
    async fn save_memory(&self, session_id: &str, context: &SessionContext) {
        if context.history.is_empty() {
            return;
        }
        let memory = match self
            .container
            .resolve_port::<dyn MemoryPort>(services::MEMORY, Some(session_id))
        {
            Ok(memory) => memory,
            Err(_) => return,
        };
        let snapshot = context.history.snapshot();
        if let Err(err) = memory.save(&snapshot).await {
            tracing::error!(session_id = %session_id, error = %err, "memory save failed");
        }
    }

    fn spawn_timeout_monitor(
        self: &Arc<Self>,
        context: Arc<SessionContext>,
        lifecycle: Arc<LifecycleManager>,
    ) {
        let manager = Arc::clone(self);
        let tick = Duration::from_secs(self.settings.session.monitor_tick_secs);
        let mut stop = lifecycle.stop_signal();

        // Deliberately untracked: the monitor triggers destroy, and destroy
        // awaits the tracked task set.
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await; // first tick fires immediately

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let timeout_ms = context.agent().idle_timeout_secs * 1000;
                        if context.idle_ms() >= timeout_ms {
                            tracing::info!(
                                session_id = %context.session_id,
                                idle_ms = context.idle_ms(),
                                "session timed out"
                            );
                            manager.destroy_session(&context.session_id).await;
                            break;
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
        });
    }

    pub fn get_context(&self, session_id: &str) -> Option<Arc<SessionContext>> {
        self.sessions.read().get(session_id).map(|e| e.context.clone())
    }

    pub fn get_lifecycle(&self, session_id: &str) -> Option<Arc<LifecycleManager>> {
        self.sessions
            .read()
            .get(session_id)
            .map(|e| e.lifecycle.clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxline_config::Settings;

    fn manager() -> Arc<SessionManager> {
        let container = Arc::new(DIContainer::new());
        let bus = Arc::new(EventBus::new());
        let transport = Arc::new(TransportRegistry::new());
        SessionManager::new(container, bus, transport, Arc::new(Settings::default()))
    }

    fn meta() -> SessionMeta {
        SessionMeta {
            device_id: Some("dev-1".to_string()),
            client_id: None,
            client_ip: "10.0.0.1".to_string(),
            from_mqtt_gateway: false,
        }
    }

    #[tokio::test]
    async fn create_registers_context_and_lifecycle() {
        let manager = manager();
        let context = manager.create_session(meta()).await.unwrap();
        let id = context.session_id.clone();

        assert_eq!(manager.session_count(), 1);
        assert!(manager.get_lifecycle(&id).unwrap().is_running());

        let resolved = manager
            .container
            .resolve::<SessionContext>(services::SESSION_CONTEXT, Some(&id))
            .unwrap();
        assert!(Arc::ptr_eq(&resolved, &context));
    }

    #[tokio::test]
    async fn destroy_clears_container_cache_and_stops_lifecycle() {
        let manager = manager();
        let context = manager.create_session(meta()).await.unwrap();
        let id = context.session_id.clone();
        let lifecycle = manager.get_lifecycle(&id).unwrap();

        manager.destroy_session(&id).await;

        assert_eq!(manager.session_count(), 0);
        assert!(lifecycle.is_stopped());
        assert_eq!(manager.container.session_service_count(&id), 0);
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let manager = manager();
        let context = manager.create_session(meta()).await.unwrap();
        let id = context.session_id.clone();

        manager.destroy_session(&id).await;
        manager.destroy_session(&id).await;
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn timeout_monitor_destroys_idle_sessions() {
        let container = Arc::new(DIContainer::new());
        let bus = Arc::new(EventBus::new());
        let transport = Arc::new(TransportRegistry::new());
        let mut settings = Settings::default();
        settings.session.monitor_tick_secs = 1;
        let manager = SessionManager::new(container, bus, transport, Arc::new(settings));

        let context = manager.create_session(meta()).await.unwrap();
        // Zero timeout: the session is immediately idle past the threshold.
        let mut agent = context.agent().as_ref().clone();
        agent.idle_timeout_secs = 0;
        context.set_agent(agent);

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(manager.session_count(), 0);
    }
}

//! Text Protocol Handlers
//!
//! Parses inbound JSON text frames and dispatches by `type`: hello, listen,
//! abort, iot, mcp, server. Malformed JSON and unknown types are logged and
//! dropped; the session continues.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use voxline_core::{
    AbortRequest, AgentConfigSource, AsrPort, DeviceToolBridge, ListenMode, SessionContext,
    TextMessageReceived, TextRecognized,
};

use voxline_config::Settings;

use crate::bus::EventBus;
use crate::container::DIContainer;
use crate::lifecycle::LifecycleManager;
use crate::services;
use crate::transport::TransportRegistry;
use crate::EngineError;

/// Dispatcher for the device's JSON control protocol.
pub struct TextMessageHandler {
    container: Arc<DIContainer>,
    bus: Arc<EventBus>,
    transport: Arc<TransportRegistry>,
    settings: Arc<Settings>,
}

impl TextMessageHandler {
    pub fn new(
        container: Arc<DIContainer>,
        bus: Arc<EventBus>,
        transport: Arc<TransportRegistry>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            container,
            bus,
            transport,
            settings,
        }
    }

    pub async fn handle(&self, event: &TextMessageReceived) -> Result<(), EngineError> {
        let session_id = event.session_id.as_str();

        let message: Value = match serde_json::from_str(&event.content) {
            Ok(message) => message,
            Err(err) => {
                // Protocol error: drop the frame, keep the session.
                tracing::warn!(session_id = %session_id, error = %err, "malformed json frame dropped");
                return Ok(());
            }
        };

        match message.get("type").and_then(|t| t.as_str()) {
            Some("hello") => self.handle_hello(session_id, &message).await,
            Some("listen") => self.handle_listen(session_id, &message).await,
            Some("abort") => self.handle_abort_message(session_id, &message).await,
            Some("iot") => self.handle_iot(session_id, &message).await,
            Some("mcp") => self.handle_mcp(session_id, &message).await,
            Some("server") => self.handle_server(session_id, &message).await,
            other => {
                tracing::warn!(
                    session_id = %session_id,
                    message_type = other.unwrap_or("<missing>"),
                    "unknown message type dropped"
                );
                Ok(())
            }
        }
    }

    /// Capability negotiation; replies with the welcome payload.
    async fn handle_hello(&self, session_id: &str, message: &Value) -> Result<(), EngineError> {
        let context = self.context(session_id)?;

        let mut welcome = context.welcome_msg();
        if !welcome.is_object() {
            welcome = serde_json::json!({
                "type": "hello",
                "transport": "websocket",
                "session_id": session_id,
            });
        }

        if let Some(audio_params) = message.get("audio_params") {
            if let Some(format) = audio_params.get("format").and_then(|f| f.as_str()) {
                tracing::debug!(session_id = %session_id, format = %format, "client audio format");
                context.set_audio_format(format);
            }
            welcome["audio_params"] = audio_params.clone();
        }

        if let Some(features) = message.get("features").and_then(|f| f.as_object()) {
            let features: HashMap<String, Value> =
                features.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            tracing::debug!(session_id = %session_id, count = features.len(), "client features");
            context.set_features(features);

            if context.has_feature("mcp") {
                self.start_device_tool_handshake(session_id)?;
            }
        }

        context.set_welcome_msg(welcome.clone());
        self.transport.send_json(session_id, &welcome).await
    }

    /// Kick off the device-tool handshake without delaying the welcome reply.
    fn start_device_tool_handshake(&self, session_id: &str) -> Result<(), EngineError> {
        let bridge = match self
            .container
            .resolve_port::<dyn DeviceToolBridge>(services::MCP_BRIDGE, Some(session_id))
        {
            Ok(bridge) => bridge,
            Err(_) => {
                tracing::debug!(session_id = %session_id, "mcp declared but no bridge registered");
                return Ok(());
            }
        };
        let lifecycle = self
            .container
            .resolve::<LifecycleManager>(services::LIFECYCLE, Some(session_id))?;

        let id = session_id.to_string();
        lifecycle.create_task(async move {
            if let Err(err) = bridge.initialize().await {
                tracing::error!(session_id = %id, error = %err, "device tool handshake failed");
            }
        })
    }

    /// Listening state machine: start / stop / detect, plus mode changes.
    async fn handle_listen(&self, session_id: &str, message: &Value) -> Result<(), EngineError> {
        let context = self.context(session_id)?;

        if let Some(mode) = message
            .get("mode")
            .and_then(|m| m.as_str())
            .and_then(ListenMode::parse)
        {
            tracing::debug!(session_id = %session_id, mode = mode.as_str(), "listen mode");
            context.set_listen_mode(mode);
        }

        match message.get("state").and_then(|s| s.as_str()) {
            Some("start") => {
                context.set_client_have_voice(true);
                context.set_client_voice_stop(false);
            }
            Some("stop") => {
                // Manual push-to-talk released: the buffered segment closes
                // on the next audio frame.
                context.set_client_have_voice(true);
                context.set_client_voice_stop(true);
            }
            Some("detect") => {
                context.set_client_have_voice(false);
                if let Ok(asr) = self
                    .container
                    .resolve_port::<dyn AsrPort>(services::ASR, Some(session_id))
                {
                    asr.clear_buffer().await;
                }

                if let Some(text) = message.get("text").and_then(|t| t.as_str()) {
                    context.touch_activity();
                    // Device-side detection feeds the same recognition flow
                    // as server-side ASR (wakeup words included).
                    self.bus
                        .publish(TextRecognized {
                            session_id: session_id.to_string(),
                            text: text.to_string(),
                            is_final: true,
                            speaker: None,
                        })
                        .await;
                }
            }
            other => {
                tracing::debug!(
                    session_id = %session_id,
                    state = other.unwrap_or("<missing>"),
                    "listen state ignored"
                );
            }
        }
        Ok(())
    }

    async fn handle_abort_message(
        &self,
        session_id: &str,
        message: &Value,
    ) -> Result<(), EngineError> {
        let reason = message
            .get("reason")
            .and_then(|r| r.as_str())
            .unwrap_or(AbortRequest::CLIENT_REQUEST)
            .to_string();
        self.bus
            .publish(AbortRequest {
                session_id: session_id.to_string(),
                reason,
            })
            .await;
        Ok(())
    }

    /// Device state descriptors and state reports.
    async fn handle_iot(&self, session_id: &str, message: &Value) -> Result<(), EngineError> {
        let context = self.context(session_id)?;

        if let Some(descriptors) = message.get("descriptors").and_then(|d| d.as_array()) {
            for descriptor in descriptors {
                if let Some(name) = descriptor.get("name").and_then(|n| n.as_str()) {
                    context.set_iot_descriptor(name, descriptor.clone());
                }
            }
            tracing::debug!(session_id = %session_id, count = descriptors.len(), "iot descriptors");
        }
        if let Some(states) = message.get("states").and_then(|s| s.as_array()) {
            tracing::debug!(session_id = %session_id, count = states.len(), "iot states");
        }
        Ok(())
    }

    /// JSON-RPC frames of the device tool protocol.
    async fn handle_mcp(&self, session_id: &str, message: &Value) -> Result<(), EngineError> {
        let context = self.context(session_id)?;
        if !context.has_feature("mcp") {
            tracing::warn!(session_id = %session_id, "mcp frame without declared capability");
            return Ok(());
        }
        let Some(payload) = message.get("payload") else {
            return Ok(());
        };

        let bridge = match self
            .container
            .resolve_port::<dyn DeviceToolBridge>(services::MCP_BRIDGE, Some(session_id))
        {
            Ok(bridge) => bridge,
            Err(_) => return Ok(()),
        };
        if let Err(err) = bridge.handle_payload(payload.clone()).await {
            tracing::error!(session_id = %session_id, error = %err, "mcp payload failed");
        }
        Ok(())
    }

    /// Administrative messages, authenticated by the shared secret.
    async fn handle_server(&self, session_id: &str, message: &Value) -> Result<(), EngineError> {
        let secret = &self.settings.manager_api.secret;
        let provided = message
            .pointer("/content/secret")
            .and_then(|s| s.as_str())
            .unwrap_or_default();

        if secret.is_empty() || provided != secret {
            tracing::warn!(session_id = %session_id, "server message with bad secret");
            let reply = serde_json::json!({
                "type": "server",
                "status": "error",
                "message": "secret verification failed",
            });
            return self.transport.send_json(session_id, &reply).await;
        }

        match message.get("action").and_then(|a| a.as_str()) {
            Some("update_config") => self.reload_agent_config(session_id).await,
            other => {
                tracing::warn!(
                    session_id = %session_id,
                    action = other.unwrap_or("<missing>"),
                    "unsupported server action"
                );
                Ok(())
            }
        }
    }

    /// Re-fetch the agent binding and rebuild the session-scoped providers
    /// against it on their next resolve.
    async fn reload_agent_config(&self, session_id: &str) -> Result<(), EngineError> {
        let context = self.context(session_id)?;

        let source = self
            .container
            .resolve_port::<dyn AgentConfigSource>(services::AGENT_CONFIG_SOURCE, None)?;
        match source.fetch(context.device_id.as_deref()).await {
            Ok(agent) => {
                context.set_agent(agent);
                for name in [services::ASR, services::MEMORY, services::TOOL_HANDLER] {
                    self.container.remove_session_service(session_id, name);
                }
                tracing::info!(session_id = %session_id, "agent config reloaded");
                let reply = serde_json::json!({
                    "type": "server",
                    "status": "success",
                    "message": "config updated",
                    "content": {"action": "update_config"},
                });
                self.transport.send_json(session_id, &reply).await
            }
            Err(err) => {
                tracing::error!(session_id = %session_id, error = %err, "agent config reload failed");
                let reply = serde_json::json!({
                    "type": "server",
                    "status": "error",
                    "message": "config reload failed",
                });
                self.transport.send_json(session_id, &reply).await
            }
        }
    }

    fn context(&self, session_id: &str) -> Result<Arc<SessionContext>, EngineError> {
        self.container
            .resolve::<SessionContext>(services::SESSION_CONTEXT, Some(session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::CaptureConnection;
    use voxline_core::AgentConfig;

    struct Fixture {
        handler: TextMessageHandler,
        context: Arc<SessionContext>,
        connection: Arc<CaptureConnection>,
        bus: Arc<EventBus>,
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
        context.set_welcome_msg(serde_json::json!({
            "type": "hello",
            "transport": "websocket",
            "session_id": "s1",
        }));
        container.register_session_instance("s1", services::SESSION_CONTEXT, context.clone());
        container.register_session_instance(
            "s1",
            services::LIFECYCLE,
            Arc::new(LifecycleManager::new("s1")),
        );

        let connection = CaptureConnection::new();
        transport.register("s1", connection.clone());

        Fixture {
            handler: TextMessageHandler::new(container, bus.clone(), transport, settings),
            context,
            connection,
            bus,
        }
    }

    fn message(session_id: &str, content: &str) -> TextMessageReceived {
        TextMessageReceived {
            session_id: session_id.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn malformed_json_is_dropped_quietly() {
        let fx = fixture();
        fx.handler.handle(&message("s1", "{not json")).await.unwrap();
        assert!(fx.connection.frames().is_empty());
    }

    #[tokio::test]
    async fn hello_negotiates_and_replies() {
        let fx = fixture();
        fx.handler
            .handle(&message(
                "s1",
                r#"{"type":"hello","audio_params":{"format":"opus","sample_rate":16000},"features":{"mcp":true}}"#,
            ))
            .await
            .unwrap();

        assert_eq!(fx.context.audio_format(), "opus");
        assert!(fx.context.has_feature("mcp"));

        let texts = fx.connection.texts();
        assert_eq!(texts.len(), 1);
        let reply: Value = serde_json::from_str(&texts[0]).unwrap();
        assert_eq!(reply["type"], "hello");
        assert_eq!(reply["session_id"], "s1");
        assert_eq!(reply["audio_params"]["sample_rate"], 16000);
    }

    #[tokio::test]
    async fn listen_updates_mode_and_flags() {
        let fx = fixture();
        fx.handler
            .handle(&message(
                "s1",
                r#"{"type":"listen","state":"start","mode":"manual"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(fx.context.listen_mode(), ListenMode::Manual);
        assert!(fx.context.client_have_voice());
        assert!(!fx.context.client_voice_stop());

        fx.handler
            .handle(&message("s1", r#"{"type":"listen","state":"stop"}"#))
            .await
            .unwrap();
        assert!(fx.context.client_voice_stop());
    }

    #[tokio::test]
    async fn listen_detect_feeds_recognition_flow() {
        let fx = fixture();
        let recognized = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let recognized_clone = recognized.clone();
        fx.bus.subscribe::<TextRecognized, _>(move |event| {
            recognized_clone.lock().push(event.text.clone());
        });

        fx.handler
            .handle(&message(
                "s1",
                r#"{"type":"listen","state":"detect","text":"hey vox"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(*recognized.lock(), vec!["hey vox".to_string()]);
    }

    #[tokio::test]
    async fn abort_message_publishes_abort_request() {
        let fx = fixture();
        let reasons = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let reasons_clone = reasons.clone();
        fx.bus.subscribe::<AbortRequest, _>(move |event| {
            reasons_clone.lock().push(event.reason.clone());
        });

        fx.handler
            .handle(&message("s1", r#"{"type":"abort"}"#))
            .await
            .unwrap();
        assert_eq!(*reasons.lock(), vec!["client_request".to_string()]);
    }

    #[tokio::test]
    async fn server_message_requires_secret() {
        let fx = fixture();
        fx.handler
            .handle(&message(
                "s1",
                r#"{"type":"server","action":"update_config","content":{"secret":"wrong"}}"#,
            ))
            .await
            .unwrap();

        let texts = fx.connection.texts();
        let reply: Value = serde_json::from_str(&texts[0]).unwrap();
        assert_eq!(reply["status"], "error");
    }

    #[tokio::test]
    async fn iot_descriptors_land_in_context() {
        let fx = fixture();
        fx.handler
            .handle(&message(
                "s1",
                r#"{"type":"iot","descriptors":[{"name":"lamp","properties":{}}]}"#,
            ))
            .await
            .unwrap();
        assert!(fx.context.iot_descriptor("lamp").is_some());
    }
}

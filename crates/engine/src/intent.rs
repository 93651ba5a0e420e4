//! Intent Service
//!
//! Pre-dialogue recognition of what the user wants: exit commands, wakeup
//! words, and — in `intent_llm` mode — a dedicated LLM classification that
//! can dispatch a tool directly. In `function_call` mode recognition happens
//! inline in the dialogue service via tool schemas, so this service only
//! handles the command shortcuts.

use std::sync::Arc;

use serde_json::Value;

use voxline_core::{
    Action, ActionResponse, IntentMode, IntentPort, Message, SessionContext, SessionDestroying,
    ToolCallRequest, ToolDispatcher,
};

use crate::bus::EventBus;
use crate::container::DIContainer;
use crate::services;
use crate::transport::TransportRegistry;
use crate::tts::TtsOrchestrator;
use crate::EngineError;

/// Intent recognition ahead of free dialogue.
pub struct IntentService {
    container: Arc<DIContainer>,
    bus: Arc<EventBus>,
    transport: Arc<TransportRegistry>,
    orchestrator: Arc<TtsOrchestrator>,
}

impl IntentService {
    pub fn new(
        container: Arc<DIContainer>,
        bus: Arc<EventBus>,
        transport: Arc<TransportRegistry>,
        orchestrator: Arc<TtsOrchestrator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            container,
            bus,
            transport,
            orchestrator,
        })
    }

    /// Returns `true` when the intent was fully handled and the regular
    /// dialogue flow must not run.
    pub async fn handle_user_intent(
        self: &Arc<Self>,
        context: &Arc<SessionContext>,
        text: &str,
    ) -> Result<bool, EngineError> {
        // Recognizers may wrap the text with speaker metadata.
        let text = self.unwrap_speaker_envelope(context, text);
        let normalized = normalize(&text);
        let agent = context.agent();

        if agent.is_exit_command(&normalized) {
            tracing::info!(session_id = %context.session_id, "exit command recognized");
            self.send_stt_echo(&context.session_id, &text).await;
            self.bus
                .publish(SessionDestroying {
                    session_id: context.session_id.clone(),
                })
                .await;
            return Ok(true);
        }

        if agent.is_wakeup_word(&normalized) {
            return self.handle_wakeup(context, &text).await.map(|_| true);
        }

        match agent.intent_mode {
            // Inline recognition in the dialogue service.
            IntentMode::FunctionCall => Ok(false),
            IntentMode::Nointent => Ok(false),
            IntentMode::IntentLlm => self.analyze_with_llm(context, &text).await,
        }
    }

    /// Wakeup word: greet (or quietly acknowledge) and arm the VAD cooldown.
    async fn handle_wakeup(
        self: &Arc<Self>,
        context: &Arc<SessionContext>,
        text: &str,
    ) -> Result<(), EngineError> {
        let agent = context.agent();
        tracing::info!(session_id = %context.session_id, "wakeup word recognized");
        context.set_just_woken_up(true);

        if agent.enable_greeting {
            self.orchestrator
                .synthesize_one_sentence(&context.session_id, agent.greeting.clone())
                .await?;
        } else {
            // Acknowledge without speaking so the client resets playback.
            self.send_stt_echo(&context.session_id, text).await;
            let stop = serde_json::json!({
                "type": "tts",
                "state": "stop",
                "session_id": context.session_id,
            });
            if let Err(err) = self.transport.send_json(&context.session_id, &stop).await {
                tracing::debug!(session_id = %context.session_id, error = %err, "stop frame failed");
            }
            context.set_client_is_speaking(false);
        }
        Ok(())
    }

    /// `intent_llm` mode: one classification call that may dispatch a tool.
    async fn analyze_with_llm(
        self: &Arc<Self>,
        context: &Arc<SessionContext>,
        text: &str,
    ) -> Result<bool, EngineError> {
        let intent = match self
            .container
            .resolve_port::<dyn IntentPort>(services::INTENT, Some(&context.session_id))
        {
            Ok(intent) => intent,
            Err(_) => {
                tracing::warn!(session_id = %context.session_id, "intent provider not configured");
                return Ok(false);
            }
        };

        let history = context.history.snapshot();
        let raw = match intent.detect_intent(context, &history, text).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(session_id = %context.session_id, error = %err, "intent detection failed");
                return Ok(false);
            }
        };

        let Ok(parsed) = serde_json::from_str::<Value>(&raw) else {
            return Ok(false);
        };
        let Some(function_call) = parsed.get("function_call") else {
            return Ok(false);
        };
        let Some(name) = function_call.get("name").and_then(|n| n.as_str()) else {
            return Ok(false);
        };
        if name == "continue_chat" {
            return Ok(false);
        }

        tracing::debug!(session_id = %context.session_id, intent = %name, "intent dispatched a tool");

        let arguments = function_call
            .get("arguments")
            .map(|a| match a {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| "{}".to_string());

        self.send_stt_echo(&context.session_id, text).await;
        context.set_client_abort(false);
        context.set_sentence_id(uuid::Uuid::new_v4().simple().to_string());
        context.history.push(Message::user(text.to_string()));

        let call = ToolCallRequest {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: name.to_string(),
            arguments,
        };
        self.dispatch_function_call(context, &intent, call, text)
            .await?;

        Ok(true)
    }

    async fn dispatch_function_call(
        self: &Arc<Self>,
        context: &Arc<SessionContext>,
        intent: &Arc<dyn IntentPort>,
        call: ToolCallRequest,
        original_text: &str,
    ) -> Result<(), EngineError> {
        let session_id = context.session_id.as_str();
        let dispatcher = self
            .container
            .resolve_port::<dyn ToolDispatcher>(services::TOOL_HANDLER, Some(session_id))
            .ok();

        let result = match &dispatcher {
            Some(dispatcher) => match dispatcher.handle_call(call.clone()).await {
                Ok(result) => result,
                Err(err) => {
                    tracing::error!(session_id = %session_id, tool = %call.name, error = %err, "tool failed");
                    ActionResponse::error(err.to_string())
                }
            },
            None => ActionResponse::error(format!("no tools available for '{}'", call.name)),
        };

        match result.action {
            Action::Response => {
                if let Some(text) = result.response {
                    self.speak(context, text).await?;
                }
            }
            Action::RequestLlm => {
                if let Some(tool_output) = result.result {
                    context
                        .history
                        .push(Message::tool(tool_output.clone(), call.id.clone()));
                    match intent.reply_result(&tool_output, original_text).await {
                        Ok(reply) => self.speak(context, reply).await?,
                        Err(err) => {
                            tracing::error!(session_id = %session_id, error = %err, "reply phrasing failed");
                            self.speak(context, tool_output).await?;
                        }
                    }
                }
            }
            Action::Error => {
                if let Some(text) = result.result.or(result.response) {
                    self.speak(context, text).await?;
                }
            }
            Action::None => {}
        }

        Ok(())
    }

    async fn speak(
        self: &Arc<Self>,
        context: &Arc<SessionContext>,
        text: String,
    ) -> Result<(), EngineError> {
        self.orchestrator
            .synthesize_one_sentence(&context.session_id, text.clone())
            .await?;
        context.history.push(Message::assistant(text));
        Ok(())
    }

    /// Handle `{"content": "...", "speaker": "..."}` envelopes produced by
    /// voiceprint-capable recognizers.
    fn unwrap_speaker_envelope(&self, context: &Arc<SessionContext>, text: &str) -> String {
        let trimmed = text.trim();
        if trimmed.starts_with('{') && trimmed.ends_with('}') {
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                if let Some(content) = value.get("content").and_then(|c| c.as_str()) {
                    if let Some(speaker) = value.get("speaker").and_then(|s| s.as_str()) {
                        context.set_current_speaker(Some(speaker.to_string()));
                    }
                    return content.to_string();
                }
            }
        }
        text.to_string()
    }

    async fn send_stt_echo(&self, session_id: &str, text: &str) {
        let frame = serde_json::json!({
            "type": "stt",
            "text": text,
            "session_id": session_id,
        });
        if let Err(err) = self.transport.send_json(session_id, &frame).await {
            tracing::debug!(session_id = %session_id, error = %err, "stt echo failed");
        }
    }
}

/// Lowercase and strip punctuation so command matching tolerates ASR noise.
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

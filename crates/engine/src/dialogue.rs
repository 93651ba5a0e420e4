//! Dialogue Service
//!
//! Turns final recognitions into spoken answers: queries memory, streams the
//! LLM, forwards text chunks to the TTS orchestrator as middle units, and
//! dispatches tool calls — recursing (bounded) when a tool result demands
//! another LLM turn. Exactly one sentence bracket per top-level user turn.

use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::{FutureExt, StreamExt};

use voxline_config::Settings;
use voxline_core::{
    AbortRequest, Action, ActionResponse, ContentType, ListenMode, LlmChunk, LlmPort, MemoryPort,
    Message, SentenceType, SessionContext, TextRecognized, ToolCallRequest, ToolDispatcher,
    TtsUnitReady,
};

use crate::bus::EventBus;
use crate::container::DIContainer;
use crate::intent::IntentService;
use crate::services;
use crate::transport::TransportRegistry;
use crate::EngineError;

/// LLM-driven turn processing.
pub struct DialogueService {
    container: Arc<DIContainer>,
    bus: Arc<EventBus>,
    transport: Arc<TransportRegistry>,
    intent: Arc<IntentService>,
    settings: Arc<Settings>,
}

impl DialogueService {
    pub fn new(
        container: Arc<DIContainer>,
        bus: Arc<EventBus>,
        transport: Arc<TransportRegistry>,
        intent: Arc<IntentService>,
        settings: Arc<Settings>,
    ) -> Arc<Self> {
        Arc::new(Self {
            container,
            bus,
            transport,
            intent,
            settings,
        })
    }

    /// Entry point for final recognitions.
    pub async fn handle_text_recognized(
        self: &Arc<Self>,
        event: &TextRecognized,
    ) -> Result<(), EngineError> {
        if !event.is_final {
            // Partials are informational; acting on them would double-speak.
            return Ok(());
        }

        let session_id = event.session_id.as_str();
        let context = self
            .container
            .resolve::<SessionContext>(services::SESSION_CONTEXT, Some(session_id))?;

        // Recognitions can also arrive from listen-detect while we are still
        // speaking; treat that like any other barge-in.
        if context.client_is_speaking() && context.listen_mode() != ListenMode::Manual {
            self.bus
                .publish(AbortRequest {
                    session_id: session_id.to_string(),
                    reason: AbortRequest::USER_INTERRUPT.to_string(),
                })
                .await;
        }

        if self.intent.handle_user_intent(&context, &event.text).await? {
            return Ok(());
        }

        self.send_stt_echo(session_id, &event.text).await;
        self.send_llm_state(session_id, "thinking").await;

        self.process_user_input(session_id.to_string(), event.text.clone(), 0)
            .await
    }

    /// Run one LLM turn at the given recursion depth.
    ///
    /// Boxed so tool results carrying `RequestLlm` can recurse.
    pub fn process_user_input(
        self: &Arc<Self>,
        session_id: String,
        text: String,
        depth: usize,
    ) -> BoxFuture<'static, Result<(), EngineError>> {
        let this = Arc::clone(self);
        async move { this.process_inner(session_id, text, depth).await }.boxed()
    }

    async fn process_inner(
        self: Arc<Self>,
        session_id: String,
        text: String,
        depth: usize,
    ) -> Result<(), EngineError> {
        let context = self
            .container
            .resolve::<SessionContext>(services::SESSION_CONTEXT, Some(&session_id))?;
        let agent = context.agent();
        let max_depth = agent.max_tool_depth;

        if depth == 0 {
            context.set_client_abort(false);
            context.set_llm_finish_task(false);
            context.set_sentence_id(uuid::Uuid::new_v4().simple().to_string());
            context.history.push(Message::user(text.clone()));
            self.emit_unit(&session_id, SentenceType::First, ContentType::Action, None)
                .await;
        }

        // Beyond the depth cap the model must answer in plain language.
        let force_final = depth >= max_depth;

        let memory = self.query_memory(&session_id, &text).await;

        let dispatcher = self
            .container
            .resolve_port::<dyn ToolDispatcher>(services::TOOL_HANDLER, Some(&session_id))
            .ok();

        let tools = if agent.intent_mode == voxline_core::IntentMode::FunctionCall && !force_final
        {
            dispatcher.as_ref().map(|d| d.schemas()).filter(|s| !s.is_empty())
        } else {
            None
        };

        let system_prompt = match context.current_speaker() {
            Some(speaker) => format!("{}\n\nThe current speaker is {speaker}.", agent.system_prompt),
            None => agent.system_prompt.clone(),
        };
        let messages = context
            .history
            .to_llm_messages(&system_prompt, memory.as_deref());

        let llm = self
            .container
            .resolve_port::<dyn LlmPort>(services::LLM, Some(&session_id))?;

        let mut stream = match llm.chat_stream(&session_id, messages, tools).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(session_id = %session_id, error = %err, "llm request failed");
                self.speak_apology(&session_id).await;
                if depth == 0 {
                    self.close_bracket(&session_id, &context).await;
                }
                return Ok(());
            }
        };

        let mut response_chunks: Vec<String> = Vec::new();
        let mut tool_calls: Vec<ToolCallRequest> = Vec::new();
        let mut aborted = false;

        while let Some(item) = stream.next().await {
            if context.client_abort() {
                // The abort handler already drained the queue and closed the
                // bracket; stop consuming and leave without a TTSEnd.
                aborted = true;
                break;
            }
            match item {
                Ok(LlmChunk::Text(chunk)) => {
                    if !chunk.is_empty() {
                        response_chunks.push(chunk.clone());
                        self.emit_unit(
                            &session_id,
                            SentenceType::Middle,
                            ContentType::Text,
                            Some(chunk),
                        )
                        .await;
                    }
                }
                Ok(LlmChunk::ToolCalls(calls)) => tool_calls.extend(calls),
                Err(err) => {
                    tracing::error!(session_id = %session_id, error = %err, "llm stream failed");
                    self.speak_apology(&session_id).await;
                    break;
                }
            }
        }
        drop(stream);

        if aborted {
            tracing::debug!(session_id = %session_id, depth, "turn aborted mid-stream");
            return Ok(());
        }

        if !tool_calls.is_empty() {
            self.handle_tool_calls(&session_id, &context, dispatcher, tool_calls, &text, depth)
                .await?;
        } else if !response_chunks.is_empty() {
            context
                .history
                .push(Message::assistant(response_chunks.concat()));
        }

        if depth == 0 && !context.client_abort() {
            self.close_bracket(&session_id, &context).await;
        }

        Ok(())
    }

    /// Execute tool calls concurrently, then fold their results back into
    /// the turn in request order.
    async fn handle_tool_calls(
        self: &Arc<Self>,
        session_id: &str,
        context: &Arc<SessionContext>,
        dispatcher: Option<Arc<dyn ToolDispatcher>>,
        tool_calls: Vec<ToolCallRequest>,
        original_text: &str,
        depth: usize,
    ) -> Result<(), EngineError> {
        let Some(dispatcher) = dispatcher else {
            tracing::warn!(session_id = %session_id, "tool calls without a dispatcher");
            return Ok(());
        };

        tracing::debug!(session_id = %session_id, count = tool_calls.len(), "executing tool calls");

        let executions = tool_calls.iter().map(|call| {
            let dispatcher = dispatcher.clone();
            let call = call.clone();
            async move { dispatcher.handle_call(call).await }
        });
        let results = join_all(executions).await;

        for (call, result) in tool_calls.into_iter().zip(results) {
            if context.client_abort() {
                break;
            }
            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    tracing::error!(
                        session_id = %session_id,
                        tool = %call.name,
                        error = %err,
                        "tool execution failed"
                    );
                    ActionResponse::error(err.to_string())
                }
            };
            self.process_tool_result(session_id, context, &call, response, original_text, depth)
                .await?;
        }

        Ok(())
    }

    async fn process_tool_result(
        self: &Arc<Self>,
        session_id: &str,
        context: &Arc<SessionContext>,
        call: &ToolCallRequest,
        result: ActionResponse,
        original_text: &str,
        depth: usize,
    ) -> Result<(), EngineError> {
        match result.action {
            Action::Response => {
                if let Some(text) = result.response {
                    self.emit_unit(
                        session_id,
                        SentenceType::Middle,
                        ContentType::Text,
                        Some(text.clone()),
                    )
                    .await;
                    context.history.push(Message::assistant(text));
                }
            }
            Action::RequestLlm => {
                let Some(tool_output) = result.result else {
                    return Ok(());
                };
                context
                    .history
                    .push(Message::tool(tool_output, call.id.clone()));
                if depth < context.agent().max_tool_depth {
                    self.process_user_input(
                        session_id.to_string(),
                        original_text.to_string(),
                        depth + 1,
                    )
                    .await?;
                } else {
                    tracing::warn!(
                        session_id = %session_id,
                        depth,
                        "tool requested another llm turn past the depth cap"
                    );
                }
            }
            Action::Error => {
                if let Some(text) = result.result.or(result.response) {
                    self.emit_unit(session_id, SentenceType::Middle, ContentType::Text, Some(text))
                        .await;
                }
            }
            Action::None => {}
        }
        Ok(())
    }

    async fn query_memory(&self, session_id: &str, text: &str) -> Option<String> {
        let memory = self
            .container
            .resolve_port::<dyn MemoryPort>(services::MEMORY, Some(session_id))
            .ok()?;
        match memory.query(text).await {
            Ok(memory) => memory,
            Err(err) => {
                tracing::error!(session_id = %session_id, error = %err, "memory query failed");
                None
            }
        }
    }

    async fn close_bracket(&self, session_id: &str, context: &Arc<SessionContext>) {
        self.emit_unit(session_id, SentenceType::Last, ContentType::Action, None)
            .await;
        context.set_llm_finish_task(true);
    }

    async fn emit_unit(
        &self,
        session_id: &str,
        sentence_type: SentenceType,
        content_type: ContentType,
        text: Option<String>,
    ) {
        self.bus
            .publish(TtsUnitReady {
                session_id: session_id.to_string(),
                sentence_type,
                content_type,
                text,
                file: None,
            })
            .await;
    }

    async fn speak_apology(&self, session_id: &str) {
        self.emit_unit(
            session_id,
            SentenceType::Middle,
            ContentType::Text,
            Some(self.settings.dialogue.apology_text.clone()),
        )
        .await;
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

    async fn send_llm_state(&self, session_id: &str, state: &str) {
        let frame = serde_json::json!({
            "type": "llm",
            "text": "🤔",
            "emotion": state,
            "session_id": session_id,
        });
        if let Err(err) = self.transport.send_json(session_id, &frame).await {
            tracing::debug!(session_id = %session_id, error = %err, "llm state frame failed");
        }
    }
}

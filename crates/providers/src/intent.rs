//! LLM Intent Classifier
//!
//! The `intent_llm` mode: one non-streaming-ish call (the stream is drained
//! to a string) that classifies the utterance into a `function_call` JSON
//! object, with `continue_chat` as the fall-through.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use voxline_core::{
    ChatMessage, CoreError, IntentPort, LlmChunk, LlmPort, Message, Role, SessionContext,
    ToolSchema,
};

/// Classification system prompt; the tool list is appended at call time.
const INTENT_PROMPT: &str = "You are an intent router for a voice assistant. Given the last \
user utterance, answer with a single JSON object and nothing else. If one of the listed \
functions should run, answer {\"function_call\": {\"name\": ..., \"arguments\": {...}}}. \
Otherwise answer {\"function_call\": {\"name\": \"continue_chat\"}}.";

pub struct LlmIntent {
    llm: Arc<dyn LlmPort>,
    tools: Vec<ToolSchema>,
}

impl LlmIntent {
    pub fn new(llm: Arc<dyn LlmPort>, tools: Vec<ToolSchema>) -> Self {
        Self { llm, tools }
    }

    async fn complete(&self, session_id: &str, messages: Vec<ChatMessage>) -> Result<String, CoreError> {
        let mut stream = self.llm.chat_stream(session_id, messages, None).await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            if let LlmChunk::Text(piece) = chunk? {
                text.push_str(&piece);
            }
        }
        Ok(text)
    }

    fn tool_listing(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl IntentPort for LlmIntent {
    async fn detect_intent(
        &self,
        context: &SessionContext,
        history: &[Message],
        text: &str,
    ) -> Result<String, CoreError> {
        let mut messages = vec![ChatMessage {
            role: Role::System.as_str().to_string(),
            content: format!("{INTENT_PROMPT}\n\nAvailable functions:\n{}", self.tool_listing()),
            tool_call_id: None,
        }];
        // A little recent context disambiguates follow-ups ("play another one").
        for message in history.iter().rev().take(4).rev() {
            if matches!(message.role, Role::User | Role::Assistant) {
                messages.push(ChatMessage {
                    role: message.role.as_str().to_string(),
                    content: message.content.clone(),
                    tool_call_id: None,
                });
            }
        }
        messages.push(ChatMessage {
            role: Role::User.as_str().to_string(),
            content: text.to_string(),
            tool_call_id: None,
        });

        let raw = self.complete(&context.session_id, messages).await?;
        // Models love to wrap JSON in code fences.
        Ok(raw
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string())
    }

    async fn reply_result(
        &self,
        context_prompt: &str,
        original: &str,
    ) -> Result<String, CoreError> {
        let messages = vec![
            ChatMessage {
                role: Role::System.as_str().to_string(),
                content: "Phrase the given tool result as one short spoken sentence answering \
                          the user."
                    .to_string(),
                tool_call_id: None,
            },
            ChatMessage {
                role: Role::User.as_str().to_string(),
                content: format!("Tool result:\n{context_prompt}\n\nUser asked: {original}"),
                tool_call_id: None,
            },
        ];
        self.complete("intent", messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLlm;
    use voxline_core::AgentConfig;

    #[tokio::test]
    async fn detect_intent_strips_code_fences() {
        let llm = Arc::new(ScriptedLlm::with_turns(vec![vec![LlmChunk::Text(
            "```json\n{\"function_call\": {\"name\": \"play_music\"}}\n```".to_string(),
        )]]));
        let intent = LlmIntent::new(llm, Vec::new());
        let context =
            SessionContext::new("s1", None, None, "127.0.0.1", false, AgentConfig::default());

        let raw = intent
            .detect_intent(&context, &[], "play some jazz")
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["function_call"]["name"], "play_music");
    }
}

//! OpenAI-Compatible LLM Adapter
//!
//! Streaming chat completions against any endpoint that speaks the OpenAI
//! wire format (vLLM, Ollama, OpenRouter, the real thing). Text deltas are
//! forwarded as they arrive; tool-call fragments are accumulated by index
//! and emitted once the stream finishes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};

use voxline_config::LlmProviderConfig;
use voxline_core::{
    ChatMessage, CoreError, LlmChunk, LlmPort, LlmStream, ToolCallRequest, ToolSchema,
};

/// Client for OpenAI-compatible chat completion endpoints.
pub struct OpenAiCompatLlm {
    client: reqwest::Client,
    config: LlmProviderConfig,
    api_key: Option<String>,
}

impl OpenAiCompatLlm {
    pub fn new(config: LlmProviderConfig) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CoreError::provider("llm", e))?;

        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn build_body(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolSchema]>,
    ) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "stream": true,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        if let Some(tools) = tools {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        },
                    })
                })
                .collect();
            body["tools"] = Value::Array(declarations);
        }

        body
    }
}

/// Partially assembled tool call, keyed by stream index.
#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Consume one SSE `data:` payload, pushing text deltas out and folding
/// tool-call fragments into `pending`. Returns `true` on `finish_reason`.
fn consume_data_line(
    data: &str,
    pending: &mut BTreeMap<u64, PendingToolCall>,
    out: &mut Vec<LlmChunk>,
) -> bool {
    let Ok(parsed) = serde_json::from_str::<Value>(data) else {
        tracing::debug!("unparseable stream line skipped");
        return false;
    };
    let Some(choice) = parsed.pointer("/choices/0") else {
        return false;
    };

    if let Some(content) = choice.pointer("/delta/content").and_then(|c| c.as_str()) {
        if !content.is_empty() {
            out.push(LlmChunk::Text(content.to_string()));
        }
    }

    if let Some(fragments) = choice.pointer("/delta/tool_calls").and_then(|t| t.as_array()) {
        for fragment in fragments {
            let index = fragment.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            let entry = pending.entry(index).or_default();
            if let Some(id) = fragment.get("id").and_then(|i| i.as_str()) {
                entry.id = id.to_string();
            }
            if let Some(name) = fragment.pointer("/function/name").and_then(|n| n.as_str()) {
                entry.name.push_str(name);
            }
            if let Some(arguments) = fragment
                .pointer("/function/arguments")
                .and_then(|a| a.as_str())
            {
                entry.arguments.push_str(arguments);
            }
        }
    }

    choice
        .get("finish_reason")
        .map(|r| !r.is_null())
        .unwrap_or(false)
}

fn drain_pending(pending: &mut BTreeMap<u64, PendingToolCall>) -> Option<LlmChunk> {
    if pending.is_empty() {
        return None;
    }
    let calls: Vec<ToolCallRequest> = std::mem::take(pending)
        .into_values()
        .filter(|call| !call.name.is_empty())
        .map(|call| ToolCallRequest {
            id: if call.id.is_empty() {
                uuid_like()
            } else {
                call.id
            },
            name: call.name,
            arguments: if call.arguments.is_empty() {
                "{}".to_string()
            } else {
                call.arguments
            },
        })
        .collect();
    if calls.is_empty() {
        None
    } else {
        Some(LlmChunk::ToolCalls(calls))
    }
}

/// Fallback id for providers that stream tool calls without one.
fn uuid_like() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

#[async_trait]
impl LlmPort for OpenAiCompatLlm {
    async fn chat_stream(
        &self,
        session_id: &str,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolSchema>>,
    ) -> Result<LlmStream, CoreError> {
        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        let body = self.build_body(&messages, tools.as_deref());

        tracing::debug!(
            session_id = %session_id,
            model = %self.config.model,
            with_tools = tools.is_some(),
            "llm request"
        );

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CoreError::provider("llm", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(CoreError::provider(
                "llm",
                format!("endpoint returned {status}: {detail}"),
            ));
        }

        let (mut tx, rx) = mpsc::unbounded::<Result<LlmChunk, CoreError>>();

        // Reader task: parse the SSE byte stream and forward chunks. The
        // receiver dropping (abort, disconnect) ends the task via send errors.
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            let mut pending: BTreeMap<u64, PendingToolCall> = BTreeMap::new();

            'read: while let Some(piece) = bytes.next().await {
                let piece = match piece {
                    Ok(piece) => piece,
                    Err(err) => {
                        let _ = tx.send(Err(CoreError::provider("llm", err))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&piece));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        break 'read;
                    }

                    let mut out = Vec::new();
                    consume_data_line(data, &mut pending, &mut out);
                    for chunk in out {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                    }
                }
            }

            if let Some(calls) = drain_pending(&mut pending) {
                let _ = tx.send(Ok(calls)).await;
            }
        });

        Ok(rx.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_deltas_are_forwarded() {
        let mut pending = BTreeMap::new();
        let mut out = Vec::new();
        let finished = consume_data_line(
            r#"{"choices":[{"delta":{"content":"hel"},"finish_reason":null}]}"#,
            &mut pending,
            &mut out,
        );
        assert!(!finished);
        assert!(matches!(&out[0], LlmChunk::Text(t) if t == "hel"));
    }

    #[test]
    fn tool_call_fragments_accumulate_across_lines() {
        let mut pending = BTreeMap::new();
        let mut out = Vec::new();

        consume_data_line(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"play_music","arguments":""}}]}}]}"#,
            &mut pending,
            &mut out,
        );
        consume_data_line(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"song"}}]}}]}"#,
            &mut pending,
            &mut out,
        );
        let finished = consume_data_line(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"_name\":\"jazz\"}"}}]},"finish_reason":"tool_calls"}]}"#,
            &mut pending,
            &mut out,
        );

        assert!(finished);
        assert!(out.is_empty());

        let Some(LlmChunk::ToolCalls(calls)) = drain_pending(&mut pending) else {
            panic!("expected tool calls");
        };
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "play_music");
        assert_eq!(calls[0].arguments, r#"{"song_name":"jazz"}"#);
    }

    #[test]
    fn garbage_lines_are_skipped() {
        let mut pending = BTreeMap::new();
        let mut out = Vec::new();
        let finished = consume_data_line("not json at all", &mut pending, &mut out);
        assert!(!finished);
        assert!(out.is_empty());
    }

    #[test]
    fn body_includes_tool_declarations() {
        let llm = OpenAiCompatLlm::new(LlmProviderConfig::default()).unwrap();
        let tools = vec![ToolSchema {
            name: "get_time".to_string(),
            description: "Current time".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        }];
        let body = llm.build_body(
            &[ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
                tool_call_id: None,
            }],
            Some(&tools),
        );

        assert_eq!(body["stream"], true);
        assert_eq!(body["tools"][0]["function"]["name"], "get_time");
    }
}

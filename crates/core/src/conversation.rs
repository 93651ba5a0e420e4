//! Conversation History
//!
//! Append-only record of one session's dialogue. Summarization adds a new
//! entry; past entries are never rewritten.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::ports::llm::ChatMessage;

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One conversation entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Set on `Tool` messages so the LLM can correlate results.
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only message log for a live session.
///
/// Interior mutability keeps the handle cloneable across handlers; writes are
/// serialized by the inner lock.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    messages: Mutex<Vec<Message>>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    pub fn push(&self, message: Message) {
        self.messages.lock().push(message);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Number of user turns.
    pub fn turn_count(&self) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.role == Role::User)
            .count()
    }

    /// Clone of the full log.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    /// Assemble the LLM input: system prompt, optional memory context, then
    /// the dialogue in order.
    pub fn to_llm_messages(
        &self,
        system_prompt: &str,
        memory: Option<&str>,
    ) -> Vec<ChatMessage> {
        let mut out = Vec::new();

        let system = match memory {
            Some(memory) if !memory.is_empty() => {
                format!("{system_prompt}\n\nRelevant context from memory:\n{memory}")
            }
            _ => system_prompt.to_string(),
        };
        out.push(ChatMessage {
            role: Role::System.as_str().to_string(),
            content: system,
            tool_call_id: None,
        });

        for message in self.messages.lock().iter() {
            out.push(ChatMessage {
                role: message.role.as_str().to_string(),
                content: message.content.clone(),
                tool_call_id: message.tool_call_id.clone(),
            });
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_append_only_and_ordered() {
        let history = ConversationHistory::new();
        history.push(Message::user("what time is it"));
        history.push(Message::assistant("it is noon"));

        let snapshot = history.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].role, Role::User);
        assert_eq!(snapshot[1].role, Role::Assistant);
        assert_eq!(history.turn_count(), 1);
    }

    #[test]
    fn llm_messages_prepend_memory_into_system() {
        let history = ConversationHistory::new();
        history.push(Message::user("hi"));

        let messages = history.to_llm_messages("You are helpful.", Some("User likes jazz."));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("User likes jazz."));
        assert_eq!(messages[1].role, "user");
    }

    #[test]
    fn tool_message_carries_call_id() {
        let message = Message::tool("played", "call-1");
        assert_eq!(message.tool_call_id.as_deref(), Some("call-1"));
    }
}

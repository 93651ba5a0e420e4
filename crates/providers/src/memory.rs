//! Conversation Memory Adapters
//!
//! `MemoryStore` is the process-wide backing store; `SessionMemory` is the
//! session-scoped adapter over it, keyed by device id so a returning device
//! gets its context back. `NoMemory` is the `nomem` mode.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use voxline_core::{CoreError, MemoryPort, Message, Role};

/// Most recent summaries kept per device.
const MAX_SUMMARIES: usize = 8;
/// Turns folded into one teardown summary.
const SUMMARY_TURNS: usize = 6;

/// In-process memory store shared by every session.
#[derive(Default)]
pub struct MemoryStore {
    summaries: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn recall(&self, device_id: &str) -> Option<String> {
        let summaries = self.summaries.read();
        let entries = summaries.get(device_id)?;
        if entries.is_empty() {
            return None;
        }
        Some(entries.join("\n"))
    }

    fn remember(&self, device_id: &str, summary: String) {
        let mut summaries = self.summaries.write();
        let entries = summaries.entry(device_id.to_string()).or_default();
        entries.push(summary);
        while entries.len() > MAX_SUMMARIES {
            entries.remove(0);
        }
    }
}

/// Session-scoped memory over the shared store.
pub struct SessionMemory {
    device_id: String,
    store: Arc<MemoryStore>,
}

impl SessionMemory {
    pub fn new(device_id: impl Into<String>, store: Arc<MemoryStore>) -> Self {
        Self {
            device_id: device_id.into(),
            store,
        }
    }

    /// Plain-text digest of the last few turns.
    fn summarize(history: &[Message]) -> Option<String> {
        let turns: Vec<String> = history
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .rev()
            .take(SUMMARY_TURNS)
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect();
        if turns.is_empty() {
            return None;
        }
        Some(turns.into_iter().rev().collect::<Vec<_>>().join("\n"))
    }
}

#[async_trait]
impl MemoryPort for SessionMemory {
    async fn query(&self, _text: &str) -> Result<Option<String>, CoreError> {
        Ok(self.store.recall(&self.device_id))
    }

    async fn save(&self, history: &[Message]) -> Result<(), CoreError> {
        if let Some(summary) = Self::summarize(history) {
            tracing::debug!(device_id = %self.device_id, "conversation summarized");
            self.store.remember(&self.device_id, summary);
        }
        Ok(())
    }
}

/// Memory disabled.
pub struct NoMemory;

#[async_trait]
impl MemoryPort for NoMemory {
    async fn query(&self, _text: &str) -> Result<Option<String>, CoreError> {
        Ok(None)
    }

    async fn save(&self, _history: &[Message]) -> Result<(), CoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn summaries_survive_across_sessions_per_device() {
        let store = MemoryStore::new();

        let first = SessionMemory::new("dev-1", store.clone());
        first
            .save(&[
                Message::user("I like jazz"),
                Message::assistant("Noted, jazz it is."),
            ])
            .await
            .unwrap();

        let second = SessionMemory::new("dev-1", store.clone());
        let recalled = second.query("music").await.unwrap();
        assert!(recalled.unwrap().contains("jazz"));

        let other = SessionMemory::new("dev-2", store);
        assert!(other.query("music").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_history_saves_nothing() {
        let store = MemoryStore::new();
        let memory = SessionMemory::new("dev-1", store.clone());
        memory.save(&[]).await.unwrap();
        assert!(store.summaries.read().is_empty());
    }

    #[tokio::test]
    async fn store_caps_summaries_per_device() {
        let store = MemoryStore::new();
        let memory = SessionMemory::new("dev-1", store.clone());
        for i in 0..20 {
            memory
                .save(&[Message::user(format!("turn {i}"))])
                .await
                .unwrap();
        }
        assert_eq!(store.summaries.read()["dev-1"].len(), MAX_SUMMARIES);
    }
}

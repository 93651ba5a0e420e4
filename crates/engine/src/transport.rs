//! Transport Registry
//!
//! Session-to-connection map plus the per-session send lock — the one
//! mandatory mutex in the engine. The registry does not know what a
//! connection is; the host process implements [`Connection`] over its socket
//! and registers it at accept time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::EngineError;

/// One live device connection as the engine sees it.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), EngineError>;

    async fn send_binary(&self, data: Vec<u8>) -> Result<(), EngineError>;

    async fn close(&self) -> Result<(), EngineError>;

    fn is_open(&self) -> bool;
}

#[derive(Clone)]
struct Registered {
    connection: Arc<dyn Connection>,
    /// Serializes writes for one session.
    send_lock: Arc<Mutex<()>>,
}

/// Registry of live connections keyed by session id.
pub struct TransportRegistry {
    connections: RwLock<HashMap<String, Registered>>,
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, session_id: impl Into<String>, connection: Arc<dyn Connection>) {
        let session_id = session_id.into();
        tracing::debug!(session_id = %session_id, "transport registered");
        self.connections.write().insert(
            session_id,
            Registered {
                connection,
                send_lock: Arc::new(Mutex::new(())),
            },
        );
    }

    pub fn unregister(&self, session_id: &str) {
        if self.connections.write().remove(session_id).is_some() {
            tracing::debug!(session_id = %session_id, "transport unregistered");
        }
    }

    pub fn is_connected(&self, session_id: &str) -> bool {
        self.connections
            .read()
            .get(session_id)
            .map(|r| r.connection.is_open())
            .unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    fn entry(&self, session_id: &str) -> Result<Registered, EngineError> {
        self.connections
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))
    }

    /// Send a text frame. Serialized per session; errors surface to the
    /// caller, which decides whether to tear the session down.
    pub async fn send_text(&self, session_id: &str, text: String) -> Result<(), EngineError> {
        let entry = self.entry(session_id)?;
        let _guard = entry.send_lock.lock().await;
        entry.connection.send_text(text).await
    }

    /// Send a binary frame. Serialized per session.
    pub async fn send_binary(&self, session_id: &str, data: Vec<u8>) -> Result<(), EngineError> {
        let entry = self.entry(session_id)?;
        let _guard = entry.send_lock.lock().await;
        entry.connection.send_binary(data).await
    }

    /// Serialize a structured value and send it as a text frame.
    pub async fn send_json(&self, session_id: &str, value: &Value) -> Result<(), EngineError> {
        let text = serde_json::to_string(value)?;
        self.send_text(session_id, text).await
    }

    /// Close the underlying connection, if still registered.
    pub async fn close(&self, session_id: &str) -> Result<(), EngineError> {
        let entry = match self.connections.read().get(session_id) {
            Some(entry) => entry.clone(),
            None => return Ok(()),
        };
        entry.connection.close().await
    }
}

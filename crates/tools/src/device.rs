//! Device Tool Bridge
//!
//! JSON-RPC tool protocol for capable devices (`features.mcp`). The bridge
//! runs the initialize / tools-list handshake over the session's transport,
//! registers the advertised functions as user-level tools, and correlates
//! call results through pending one-shot channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use voxline_core::{ActionResponse, CoreError, DeviceToolBridge};
use voxline_engine::TransportRegistry;

use crate::registry::{FunctionTool, ToolRegistry};
use crate::ToolError;

/// Budget for one device round trip.
const DEVICE_RPC_TIMEOUT_SECS: u64 = 30;
/// Budget for the tools-list handshake.
const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

struct BridgeInner {
    session_id: String,
    transport: Arc<TransportRegistry>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
}

impl BridgeInner {
    /// Send one JSON-RPC request and return the receiver for its result.
    async fn request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<oneshot::Receiver<Value>, CoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let frame = json!({
            "type": "mcp",
            "session_id": self.session_id,
            "payload": {
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            },
        });

        if let Err(err) = self.transport.send_json(&self.session_id, &frame).await {
            self.pending.lock().remove(&id);
            return Err(CoreError::provider("device", err));
        }
        Ok(rx)
    }

    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, CoreError> {
        let rx = self.request(method, params).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(CoreError::provider("device", "rpc channel dropped")),
            Err(_) => Err(CoreError::ProviderTimeout(timeout.as_secs())),
        }
    }
}

/// One device-advertised function exposed to the model.
struct DeviceTool {
    name: String,
    description: String,
    parameters: Value,
    inner: Arc<BridgeInner>,
}

#[async_trait]
impl FunctionTool for DeviceTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    fn timeout_secs(&self) -> u64 {
        DEVICE_RPC_TIMEOUT_SECS
    }

    async fn invoke(&self, args: Value) -> Result<ActionResponse, ToolError> {
        let result = self
            .inner
            .call(
                "tools/call",
                json!({"name": self.name, "arguments": args}),
                Duration::from_secs(DEVICE_RPC_TIMEOUT_SECS),
            )
            .await
            .map_err(|e| ToolError::DeviceRpc(e.to_string()))?;

        // Devices answer with MCP content blocks; fold the text together.
        let text = result
            .pointer("/content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| result.to_string());

        Ok(ActionResponse::request_llm(text))
    }
}

/// Session-scoped bridge implementing the core port.
pub struct McpBridge {
    inner: Arc<BridgeInner>,
    registry: Arc<ToolRegistry>,
}

impl McpBridge {
    pub fn new(
        session_id: impl Into<String>,
        transport: Arc<TransportRegistry>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                session_id: session_id.into(),
                transport,
                next_id: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
            }),
            registry,
        }
    }

    fn register_advertised_tools(&self, result: &Value) -> usize {
        let Some(tools) = result.pointer("/tools").and_then(|t| t.as_array()) else {
            return 0;
        };
        let mut registered = 0;
        for tool in tools {
            let Some(name) = tool.get("name").and_then(|n| n.as_str()) else {
                continue;
            };
            let description = tool
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("Device-side function")
                .to_string();
            let parameters = tool
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| json!({"type": "object"}));

            self.registry.register_function(DeviceTool {
                name: name.to_string(),
                description,
                parameters,
                inner: self.inner.clone(),
            });
            registered += 1;
        }
        registered
    }
}

#[async_trait]
impl DeviceToolBridge for McpBridge {
    async fn initialize(&self) -> Result<(), CoreError> {
        let timeout = Duration::from_secs(HANDSHAKE_TIMEOUT_SECS);

        self.inner
            .call(
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "voxline", "version": env!("CARGO_PKG_VERSION")},
                }),
                timeout,
            )
            .await?;

        let listing = self.inner.call("tools/list", json!({}), timeout).await?;
        let count = self.register_advertised_tools(&listing);
        tracing::info!(
            session_id = %self.inner.session_id,
            tools = count,
            "device tools registered"
        );
        Ok(())
    }

    async fn handle_payload(&self, payload: Value) -> Result<(), CoreError> {
        let Some(id) = payload.get("id").and_then(|i| i.as_u64()) else {
            // Notification; nothing awaits it.
            tracing::debug!(session_id = %self.inner.session_id, "mcp notification");
            return Ok(());
        };

        if let Some(error) = payload.get("error") {
            tracing::warn!(
                session_id = %self.inner.session_id,
                rpc_id = id,
                error = %error,
                "device rpc error"
            );
        }

        let result = payload
            .get("result")
            .cloned()
            .unwrap_or(Value::Null);

        if let Some(sender) = self.inner.pending.lock().remove(&id) {
            let _ = sender.send(result);
        }
        Ok(())
    }
}

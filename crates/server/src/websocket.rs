//! WebSocket Handler
//!
//! Per-connection lifecycle: accept, session creation, the read loop feeding
//! the message router, a write half registered as the engine's transport
//! connection, a server-side heartbeat, and teardown on close.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;

use voxline_engine::{Connection, EngineError, SessionMeta};

use crate::state::AppState;

/// The engine's view of one accepted socket.
struct SocketConnection {
    sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    open: AtomicBool,
}

impl SocketConnection {
    fn new(sender: Arc<Mutex<SplitSink<WebSocket, Message>>>) -> Arc<Self> {
        Arc::new(Self {
            sender,
            open: AtomicBool::new(true),
        })
    }

    async fn send(&self, message: Message) -> Result<(), EngineError> {
        let mut sender = self.sender.lock().await;
        sender.send(message).await.map_err(|err| {
            self.open.store(false, Ordering::Release);
            EngineError::Transport(err.to_string())
        })
    }
}

#[async_trait]
impl Connection for SocketConnection {
    async fn send_text(&self, text: String) -> Result<(), EngineError> {
        self.send(Message::Text(text)).await
    }

    async fn send_binary(&self, data: Vec<u8>) -> Result<(), EngineError> {
        self.send(Message::Binary(data)).await
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.open.store(false, Ordering::Release);
        self.send(Message::Close(None)).await
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// Extract the session facts from the upgrade request.
fn session_meta(
    headers: &HeaderMap,
    query: &std::collections::HashMap<String, String>,
    peer: SocketAddr,
) -> SessionMeta {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    };

    // Proxies put the real client address in front.
    let client_ip = header("x-real-ip")
        .or_else(|| {
            header("x-forwarded-for")
                .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
        })
        .unwrap_or_else(|| peer.ip().to_string());

    SessionMeta {
        device_id: header("device-id"),
        client_id: header("client-id"),
        client_ip,
        from_mqtt_gateway: query.get("from").map(|v| v == "mqtt_gateway").unwrap_or(false),
    }
}

/// Upgrade handler for the device endpoint.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<std::collections::HashMap<String, String>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let meta = session_meta(&headers, &query, peer);
    ws.on_upgrade(move |socket| handle_socket(socket, state, meta))
}

async fn handle_socket(socket: WebSocket, state: AppState, meta: SessionMeta) {
    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));
    let connection = SocketConnection::new(sender.clone());

    let context = match state.session_manager.create_session(meta).await {
        Ok(context) => context,
        Err(err) => {
            tracing::error!(error = %err, "session creation failed");
            let mut sender = sender.lock().await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    let session_id = context.session_id.clone();

    state.transport.register(&session_id, connection.clone());
    tracing::info!(session_id = %session_id, "websocket connected");

    spawn_heartbeat(&state, &session_id, connection.clone());

    // Read loop. Every inbound frame goes through the router; errors there
    // are per-frame, never connection-fatal.
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if let Err(err) = state.router.route_text(&session_id, text).await {
                    tracing::error!(session_id = %session_id, error = %err, "text route failed");
                }
            }
            Ok(Message::Binary(data)) => {
                if let Err(err) = state.router.route_binary(&session_id, data).await {
                    tracing::error!(session_id = %session_id, error = %err, "audio route failed");
                }
            }
            Ok(Message::Ping(payload)) => {
                let mut sender = sender.lock().await;
                let _ = sender.send(Message::Pong(payload)).await;
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                tracing::info!(session_id = %session_id, "client closed");
                break;
            }
            Err(err) => {
                tracing::warn!(session_id = %session_id, error = %err, "websocket error");
                break;
            }
        }
    }

    connection.open.store(false, Ordering::Release);
    state.session_manager.destroy_session(&session_id).await;
    tracing::info!(session_id = %session_id, "websocket closed");
}

/// Server-side heartbeat: periodic pings tracked by the session lifecycle so
/// teardown cancels them.
fn spawn_heartbeat(state: &AppState, session_id: &str, connection: Arc<SocketConnection>) {
    let interval_secs = state.settings.server.heartbeat_secs;
    if interval_secs == 0 {
        return;
    }
    let Some(lifecycle) = state.session_manager.get_lifecycle(session_id) else {
        return;
    };

    let id = session_id.to_string();
    let result = lifecycle.create_task(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.tick().await;
        loop {
            interval.tick().await;
            if connection.send(Message::Ping(Vec::new())).await.is_err() {
                tracing::debug!(session_id = %id, "heartbeat failed, connection gone");
                break;
            }
        }
    });
    if let Err(err) = result {
        tracing::debug!(session_id = %session_id, error = %err, "heartbeat not started");
    }
}

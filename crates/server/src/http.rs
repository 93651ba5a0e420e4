//! HTTP Router

use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::websocket::ws_handler;

/// Build the application router: the device WebSocket endpoint plus health.
pub fn create_router(state: AppState) -> Router {
    let ws_path = state.settings.server.ws_path.clone();

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.session_manager.session_count(),
        "connections": state.transport.connection_count(),
    }))
}

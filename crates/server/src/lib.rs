//! Voxline Server
//!
//! Hosts the engine behind an axum WebSocket endpoint: connection accept,
//! read/write loops, heartbeat, provider registration, and the manager-API
//! client for agent configuration.

pub mod agent_api;
pub mod bootstrap;
pub mod http;
pub mod state;
pub mod websocket;

pub use agent_api::{HttpAgentConfigSource, StaticAgentConfigSource};
pub use bootstrap::register_providers;
pub use http::create_router;
pub use state::AppState;

use thiserror::Error;

/// Server errors.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] voxline_config::ConfigError),

    #[error("engine error: {0}")]
    Engine(#[from] voxline_engine::EngineError),

    #[error(transparent)]
    Core(#[from] voxline_core::CoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

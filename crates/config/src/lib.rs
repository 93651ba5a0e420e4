//! Voxline Configuration
//!
//! Layered settings loading: `config/default.yaml`, an optional
//! environment-specific file, then `VOXLINE__`-prefixed environment
//! variables. Every field has a serde default so a bare process starts with
//! sane values.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, AgentDefaults, AudioConfig, DialogueConfig, LlmProviderConfig,
    ManagerApiConfig, ObservabilityConfig, ProvidersConfig, ServerConfig, SessionConfig,
    Settings, TtsProviderConfig,
};

use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config load error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

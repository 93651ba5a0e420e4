//! Agent Configuration Sources
//!
//! Implementations of the core config port: the static source serves the
//! settings-file defaults, the HTTP source asks the administrative console
//! for the per-device agent binding and falls back to the defaults when the
//! console has nothing for the device.

use std::time::Duration;

use async_trait::async_trait;

use voxline_config::Settings;
use voxline_core::{AgentConfig, AgentConfigSource, CoreError};

/// Serves the agent defaults from the settings file.
pub struct StaticAgentConfigSource {
    agent: AgentConfig,
}

impl StaticAgentConfigSource {
    pub fn new(settings: &Settings) -> Self {
        Self {
            agent: settings.agent.to_agent_config(
                settings.session.idle_timeout_secs,
                settings.dialogue.max_tool_depth,
            ),
        }
    }
}

#[async_trait]
impl AgentConfigSource for StaticAgentConfigSource {
    async fn fetch(&self, _device_id: Option<&str>) -> Result<AgentConfig, CoreError> {
        Ok(self.agent.clone())
    }
}

/// Fetches the device's agent binding from the manager API.
pub struct HttpAgentConfigSource {
    client: reqwest::Client,
    base_url: String,
    secret: String,
    fallback: AgentConfig,
}

impl HttpAgentConfigSource {
    pub fn new(settings: &Settings, base_url: String) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(
                voxline_config::constants::timeouts::CONNECT_SECS,
            ))
            .timeout(Duration::from_secs(
                voxline_config::constants::timeouts::REQUEST_SECS,
            ))
            .build()
            .map_err(|e| CoreError::provider("manager-api", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: settings.manager_api.secret.clone(),
            fallback: settings.agent.to_agent_config(
                settings.session.idle_timeout_secs,
                settings.dialogue.max_tool_depth,
            ),
        })
    }
}

#[async_trait]
impl AgentConfigSource for HttpAgentConfigSource {
    async fn fetch(&self, device_id: Option<&str>) -> Result<AgentConfig, CoreError> {
        let Some(device_id) = device_id else {
            return Ok(self.fallback.clone());
        };

        let url = format!("{}/api/agent/{device_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.secret)
            .send()
            .await
            .map_err(|e| CoreError::provider("manager-api", e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::info!(device_id = %device_id, "device not registered, using defaults");
            return Ok(self.fallback.clone());
        }
        if !response.status().is_success() {
            return Err(CoreError::provider(
                "manager-api",
                format!("returned {}", response.status()),
            ));
        }

        let mut agent: AgentConfig = response
            .json()
            .await
            .map_err(|e| CoreError::provider("manager-api", e))?;

        // The console never controls local operational budgets.
        if agent.idle_timeout_secs == 0 {
            agent.idle_timeout_secs = self.fallback.idle_timeout_secs;
        }
        if agent.max_tool_depth == 0 {
            agent.max_tool_depth = self.fallback.max_tool_depth;
        }

        Ok(agent)
    }
}

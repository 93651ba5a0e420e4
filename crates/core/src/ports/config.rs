//! Agent Configuration Port
//!
//! The engine's only view of the administrative console: given a device id,
//! return the agent binding it should run with.

use async_trait::async_trait;

use crate::agent::AgentConfig;
use crate::CoreError;

#[async_trait]
pub trait AgentConfigSource: Send + Sync {
    async fn fetch(&self, device_id: Option<&str>) -> Result<AgentConfig, CoreError>;
}

//! Memory Port

use async_trait::async_trait;

use crate::conversation::Message;
use crate::CoreError;

/// Conversation memory, session-scoped.
///
/// `query` runs before each LLM turn; `save` runs once at teardown and may
/// summarize. Long-term stores are external; this port is the only surface
/// the engine sees.
#[async_trait]
pub trait MemoryPort: Send + Sync {
    /// Retrieve context relevant to `text`, if any.
    async fn query(&self, text: &str) -> Result<Option<String>, CoreError>;

    /// Persist or summarize the finished conversation.
    async fn save(&self, history: &[Message]) -> Result<(), CoreError>;
}

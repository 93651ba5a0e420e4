//! Intent Port

use async_trait::async_trait;

use crate::conversation::Message;
use crate::session::SessionContext;
use crate::CoreError;

/// LLM-backed intent recognition (the `intent_llm` mode).
///
/// `detect_intent` returns the classifier's raw output; by convention a JSON
/// object with a `function_call` member, or `continue_chat` to fall through
/// to free dialogue.
#[async_trait]
pub trait IntentPort: Send + Sync {
    async fn detect_intent(
        &self,
        context: &SessionContext,
        history: &[Message],
        text: &str,
    ) -> Result<String, CoreError>;

    /// Phrase a tool result as a short spoken reply.
    async fn reply_result(&self, context_prompt: &str, original: &str)
        -> Result<String, CoreError>;
}

//! Session Exit Tool
//!
//! Lets the model end the conversation on request ("goodbye", "that's all").
//! Marks the session to close once the farewell bracket finishes, so the
//! goodbye is actually heard before the connection drops.

use async_trait::async_trait;
use serde_json::Value;

use voxline_core::{ActionResponse, SessionContext};
use voxline_engine::services;

use crate::registry::{SystemContext, SystemTool};
use crate::ToolError;

pub struct EndSessionTool;

#[async_trait]
impl SystemTool for EndSessionTool {
    fn name(&self) -> &str {
        "end_session"
    }

    fn description(&self) -> &str {
        "End the conversation and close the connection. Use when the user says goodbye."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "farewell": {
                    "type": "string",
                    "description": "Optional parting phrase to speak first",
                }
            },
        })
    }

    async fn invoke(&self, ctx: &SystemContext, args: Value) -> Result<ActionResponse, ToolError> {
        let context = ctx
            .container
            .resolve::<SessionContext>(services::SESSION_CONTEXT, Some(&ctx.session_id))
            .map_err(|e| ToolError::execution("end_session", e))?;

        context.set_close_after_chat(true);
        tracing::info!(session_id = %ctx.session_id, "session will close after farewell");

        let farewell = args
            .get("farewell")
            .and_then(|f| f.as_str())
            .unwrap_or("Goodbye!")
            .to_string();
        Ok(ActionResponse::response(farewell))
    }
}

//! Current Time Tool

use async_trait::async_trait;
use chrono::Local;
use serde_json::Value;

use voxline_core::ActionResponse;

use crate::registry::FunctionTool;
use crate::ToolError;

/// Answers "what time is it" style questions through the LLM, which phrases
/// the raw clock reading naturally.
pub struct CurrentTimeTool;

#[async_trait]
impl FunctionTool for CurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current local time and date."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn invoke(&self, _args: Value) -> Result<ActionResponse, ToolError> {
        let now = Local::now();
        Ok(ActionResponse::request_llm(format!(
            "Current local time: {}. Today is {}.",
            now.format("%H:%M"),
            now.format("%A, %B %e, %Y"),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxline_core::Action;

    #[tokio::test]
    async fn time_requests_llm_phrasing() {
        let result = CurrentTimeTool
            .invoke(serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result.action, Action::RequestLlm);
        assert!(result.result.unwrap().contains("Current local time"));
    }
}

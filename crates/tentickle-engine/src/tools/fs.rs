use async_trait::async_trait;
use serde_json::Value;

use super::{text_block, Tool, ToolContext, ToolResultBlock};
use crate::model::ToolDefinition;

/// Reads a workspace-relative file through the session's sandbox.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read a UTF-8 text file relative to the workspace root.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Workspace-relative file path" }
                },
                "required": ["path"]
            }),
        }
    }

    async fn call(
        &self,
        input: Value,
        ctx: &ToolContext,
    ) -> Result<Vec<ToolResultBlock>, String> {
        let path = input
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing 'path' field".to_string())?;

        let content = ctx
            .sandbox
            .read(path)
            .await
            .map_err(|e| e.to_string())?;

        Ok(vec![text_block(content)])
    }
}

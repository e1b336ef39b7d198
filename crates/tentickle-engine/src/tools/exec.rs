use async_trait::async_trait;
use serde_json::Value;
use tentickle_sandbox::ExecOptions;

use super::{text_block, Tool, ToolContext, ToolResultBlock};
use crate::model::ToolDefinition;

/// Runs a shell command in the session's sandbox (spec §5: "external-tool
/// shell execution ... have independent timeouts").
pub struct ExecTool;

#[async_trait]
impl Tool for ExecTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "exec".to_string(),
            description: "Run a shell command in the workspace sandbox and return its output."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string" },
                    "timeout_secs": { "type": "integer" }
                },
                "required": ["command"]
            }),
        }
    }

    async fn call(
        &self,
        input: Value,
        ctx: &ToolContext,
    ) -> Result<Vec<ToolResultBlock>, String> {
        let command = input
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing 'command' field".to_string())?;

        let mut opts = ExecOptions::default();
        if let Some(t) = input.get("timeout_secs").and_then(Value::as_u64) {
            opts.timeout_secs = t;
        }

        let result = ctx
            .sandbox
            .exec(command, opts)
            .await
            .map_err(|e| e.to_string())?;

        let summary = format!(
            "exit_code: {}\nstdout:\n{}\nstderr:\n{}",
            result.exit_code, result.stdout, result.stderr
        );
        if result.exit_code != 0 {
            return Err(summary);
        }
        Ok(vec![text_block(summary)])
    }
}

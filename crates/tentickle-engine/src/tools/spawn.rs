use async_trait::async_trait;
use serde_json::Value;

use super::{text_block, Tool, ToolContext, ToolResultBlock};
use crate::model::ToolDefinition;

/// `ctx.spawn(Agent, input, {label, maxTicks})` (spec §4.1 "Spawning"). The
/// child session shares the parent's sandbox and workspace and runs to
/// completion independently; this tool's `call` future suspends until the
/// child finishes, without blocking sibling tool calls on the same tick
/// (spec §5 suspension points).
pub struct SpawnTool;

#[async_trait]
impl Tool for SpawnTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "spawn".to_string(),
            description: "Start a child agent session and wait for its result.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "agent": { "type": "string" },
                    "input": { "type": "string" },
                    "label": { "type": "string" },
                    "max_ticks": { "type": "integer" }
                },
                "required": ["agent", "input"]
            }),
        }
    }

    async fn call(
        &self,
        input: Value,
        ctx: &ToolContext,
    ) -> Result<Vec<ToolResultBlock>, String> {
        let host = ctx
            .spawn_host
            .as_ref()
            .ok_or_else(|| "spawning is not available in this context".to_string())?;

        let agent = input
            .get("agent")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing 'agent' field".to_string())?;
        let child_input = input
            .get("input")
            .cloned()
            .ok_or_else(|| "missing 'input' field".to_string())?;
        let label = input
            .get("label")
            .and_then(Value::as_str)
            .map(str::to_string);
        let max_ticks = input.get("max_ticks").and_then(Value::as_u64).map(|n| n as u32);

        let result = host.spawn(agent, child_input, label, max_ticks).await?;
        Ok(vec![text_block(result.to_string())])
    }
}

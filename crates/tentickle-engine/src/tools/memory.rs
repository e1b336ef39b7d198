use async_trait::async_trait;
use serde_json::Value;
use tentickle_memory::types::RecallOptions;

use super::{text_block, Tool, ToolContext, ToolResultBlock};
use crate::model::ToolDefinition;

/// Persists a fact into the hybrid memory subsystem (spec §4.5 `remember`),
/// namespaced by session id so recall stays scoped per conversation owner.
pub struct MemoryRememberTool;

#[async_trait]
impl Tool for MemoryRememberTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "memory_remember".to_string(),
            description: "Store a fact worth recalling in future sessions.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "content": { "type": "string" },
                    "topic": { "type": "string" },
                    "importance": { "type": "number" }
                },
                "required": ["content"]
            }),
        }
    }

    async fn call(
        &self,
        input: Value,
        ctx: &ToolContext,
    ) -> Result<Vec<ToolResultBlock>, String> {
        let memory = ctx
            .memory
            .as_ref()
            .ok_or_else(|| "memory subsystem not configured for this session".to_string())?;

        let content = input
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing 'content' field".to_string())?;
        let topic = input.get("topic").and_then(Value::as_str);
        let importance = input
            .get("importance")
            .and_then(Value::as_f64)
            .unwrap_or(0.5);

        let entry = memory
            .remember(
                &ctx.session_id,
                content,
                topic,
                importance,
                serde_json::json!({}),
                Some(&ctx.session_id),
            )
            .map_err(|e| e.to_string())?;

        Ok(vec![text_block(format!("remembered: {}", entry.id))])
    }
}

/// Hybrid FTS5 + vector recall (spec §4.5 `recall`).
pub struct MemoryRecallTool;

#[async_trait]
impl Tool for MemoryRecallTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "memory_recall".to_string(),
            description: "Search remembered facts relevant to a query.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "limit": { "type": "integer" }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(
        &self,
        input: Value,
        ctx: &ToolContext,
    ) -> Result<Vec<ToolResultBlock>, String> {
        let memory = ctx
            .memory
            .as_ref()
            .ok_or_else(|| "memory subsystem not configured for this session".to_string())?;

        let query = input
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing 'query' field".to_string())?;
        let limit = input
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(5);

        let response = memory
            .recall(
                query,
                RecallOptions {
                    namespace: ctx.session_id.clone(),
                    topic: None,
                    limit,
                    decay_lambda: None,
                },
            )
            .await
            .map_err(|e| e.to_string())?;

        let lines: Vec<String> = response
            .entries
            .iter()
            .map(|e| format!("- {} (score {:.2})", e.entry.content, e.score))
            .collect();
        let summary = if lines.is_empty() {
            "no matching memories".to_string()
        } else {
            lines.join("\n")
        };
        Ok(vec![text_block(summary)])
    }
}

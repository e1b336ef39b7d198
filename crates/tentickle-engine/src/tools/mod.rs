//! Tool catalogue (spec §4.1 step 4 "dispatch tools"). A `Tool` is the
//! unit the active `ExecutionConfig::tools` vector holds; each one wraps an
//! external collaborator (`tentickle_sandbox::Sandbox`,
//! `tentickle_memory::MemoryManager`, or a spawned child session).

mod exec;
mod fs;
mod memory;
mod spawn;

pub use exec::ExecTool;
pub use fs::ReadFileTool;
pub use memory::{MemoryRecallTool, MemoryRememberTool};
pub use spawn::SpawnTool;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use tentickle_memory::MemoryManager;
use tentickle_sandbox::Sandbox;

use crate::model::ToolDefinition;

/// External collaborator a spawn-capable tool calls into — implemented by
/// `crate::session::Session` (spec §4.1 "Spawning": `ctx.spawn(Agent, input,
/// {label, maxTicks})`). Kept as a trait here to avoid a module cycle
/// between `tools` and `session`.
#[async_trait]
pub trait SpawnHost: Send + Sync {
    async fn spawn(
        &self,
        agent: &str,
        input: Value,
        label: Option<String>,
        max_ticks: Option<u32>,
    ) -> Result<Value, String>;
}

/// External collaborator that surfaces a `tool_confirmation_request` event
/// and suspends until the user responds (spec §4.1 step 4). Implemented by
/// `Session`; a tool that needs confirmation calls `ctx.confirm.request(..)`
/// from inside its own `call` future, so the suspension is transparent to
/// the dispatch loop (other parallel tool calls on the same tick are not
/// blocked — spec §4.1 step 4, §5 suspension points).
#[async_trait]
pub trait ConfirmationHost: Send + Sync {
    async fn request(
        &self,
        tool_use_id: &str,
        name: &str,
        arguments: &Value,
        message: Option<&str>,
    ) -> bool;
}

/// Confirmation host that always approves — used where no interactive
/// client is attached (tests, cron-triggered executions).
pub struct AutoApprove;

#[async_trait]
impl ConfirmationHost for AutoApprove {
    async fn request(&self, _: &str, _: &str, _: &Value, _: Option<&str>) -> bool {
        true
    }
}

/// Everything a tool invocation needs from its environment, assembled by
/// `Session`/`Execution` at dispatch time (spec §4.1 step 4).
pub struct ToolContext {
    pub session_id: String,
    pub sandbox: Arc<dyn Sandbox>,
    pub memory: Option<Arc<MemoryManager>>,
    pub cancel: CancellationToken,
    pub confirm: Arc<dyn ConfirmationHost>,
    pub spawn_host: Option<Arc<dyn SpawnHost>>,
}

/// A single content block produced by a tool, shaped like
/// `tentickle_store::types::ContentBlock` but not yet persisted (the
/// engine assigns ids/positions when committing the `tool_result` message).
pub type ToolResultBlock = Value;

/// The unit of tool dispatch (spec §4.1 step 4). Implementations return
/// `Err` only for genuine tool failures — the engine wraps those into a
/// `tool_result{isError:true}` and feeds them back to the model rather
/// than failing the execution (spec §7 error taxonomy).
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(
        &self,
        input: Value,
        ctx: &ToolContext,
    ) -> Result<Vec<ToolResultBlock>, String>;
}

pub fn text_block(text: impl Into<String>) -> ToolResultBlock {
    serde_json::json!({ "type": "text", "text": text.into() })
}

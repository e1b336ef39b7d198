//! `ExecutionConfig` — the systems-translation of the source's reactive
//! component tree (spec §9 "Reactive component tree → data pipeline"): a
//! declarative struct built once at session open, consumed fresh by every
//! `render` step instead of being re-derived from a tree walk.

use std::sync::Arc;

use crate::grounding::GroundingProvider;
use crate::model::{ModelClient, ToolDefinition};
use crate::tools::Tool;

/// Governs when an execution keeps ticking (spec §4.1 step 5, §9 open
/// question 1: `max_ticks` is an absolute ceiling regardless of what a
/// continuation predicate or tool DONE-marker decides).
pub trait ContinuationPolicy: Send + Sync {
    /// Called after tools resolve on the current tick. `tick` is the
    /// 0-based index of the tick that just completed.
    fn should_continue(&self, tick: u32, last_stop_reason: &str, had_tool_calls: bool) -> bool;
}

/// Default policy: continue exactly when the model asked for a tool
/// (`stop_reason == "tool_use"`).
pub struct ToolUseContinuation;

impl ContinuationPolicy for ToolUseContinuation {
    fn should_continue(&self, _tick: u32, last_stop_reason: &str, had_tool_calls: bool) -> bool {
        had_tool_calls && last_stop_reason == "tool_use"
    }
}

/// Declarative description of one session's mounted component tree: an
/// ordered list of grounding providers, a model binding, a tool catalogue,
/// and a continuation policy (spec §9).
pub struct ExecutionConfig {
    pub model_name: String,
    pub model: Arc<dyn ModelClient>,
    pub max_tokens: u32,
    pub max_ticks: u32,
    pub grounding: Vec<Arc<dyn GroundingProvider>>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub continuation: Arc<dyn ContinuationPolicy>,
}

impl ExecutionConfig {
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn find_tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.definition().name == name)
    }
}

/// Default absolute tick ceiling (spec §9 open question 1).
pub const DEFAULT_MAX_TICKS: u32 = 25;

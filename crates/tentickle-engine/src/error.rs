use thiserror::Error;

use crate::model::ModelError;

/// Errors surfaced by the session/execution engine (spec §7). Tool errors
/// are not represented here — they are caught at the dispatch site and
/// folded into a `tool_result{isError:true}` block, never bubbled.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session not found: {id}")]
    SessionNotFound { id: String },

    #[error("execution not found: {id}")]
    ExecutionNotFound { id: String },

    #[error("an execution is already running for session {session_id}")]
    ExecutionInProgress { session_id: String },

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("store error: {0}")]
    Store(#[from] tentickle_store::StoreError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] tentickle_sandbox::SandboxError),

    #[error("memory error: {0}")]
    Memory(#[from] tentickle_memory::MemoryError),

    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("execution aborted")]
    Aborted,

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Short error code string, mirroring `tentickle_core::error::CoreError::code`
    /// (spec §7 error taxonomy).
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            EngineError::ExecutionNotFound { .. } => "EXECUTION_NOT_FOUND",
            EngineError::ExecutionInProgress { .. } => "EXECUTION_IN_PROGRESS",
            EngineError::Model(_) => "MODEL_PROVIDER_ERROR",
            EngineError::Store(_) => "DATABASE_ERROR",
            EngineError::Sandbox(_) => "SANDBOX_ERROR",
            EngineError::Memory(_) => "MEMORY_ERROR",
            EngineError::UnknownTool { .. } => "UNKNOWN_TOOL",
            EngineError::Serialization(_) => "SERIALIZATION_ERROR",
            EngineError::Aborted => "ABORTED",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

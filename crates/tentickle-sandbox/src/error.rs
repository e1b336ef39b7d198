//! Error types for the tentickle-sandbox crate.

use thiserror::Error;

/// All errors that can originate from sandbox operations.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Child-process spawn failed.
    #[error("spawn error: {0}")]
    Spawn(String),

    /// Underlying I/O failure (read, write, flush).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Operation exceeded its time budget.
    #[error("operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Command was rejected by the safety checker.
    #[error("command blocked: {reason}")]
    CommandBlocked { reason: String },

    /// Requested path escapes the mounted workspace root.
    #[error("path escapes workspace: {0}")]
    PathEscape(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, SandboxError>;

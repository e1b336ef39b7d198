use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("method not found: {method}")]
    MethodNotFound { method: String },

    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("entity not found: {id}")]
    EntityNotFound { id: String },

    #[error("session not found: {key}")]
    SessionNotFound { key: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("model provider error: {0}")]
    ModelProvider(String),

    #[error("channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Short error code string sent to clients in `res`/error frames.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::AuthFailed(_) => "AUTH_FAILED",
            CoreError::Protocol(_) => "PROTOCOL_ERROR",
            CoreError::MethodNotFound { .. } => "METHOD_NOT_FOUND",
            CoreError::PermissionDenied { .. } => "PERMISSION_DENIED",
            CoreError::EntityNotFound { .. } => "ENTITY_NOT_FOUND",
            CoreError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            CoreError::Database(_) => "DATABASE_ERROR",
            CoreError::ModelProvider(_) => "MODEL_PROVIDER_ERROR",
            CoreError::Channel { .. } => "CHANNEL_ERROR",
            CoreError::Serialization(_) => "SERIALIZATION_ERROR",
            CoreError::Io(_) => "IO_ERROR",
            CoreError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            CoreError::Timeout { .. } => "TIMEOUT",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

use thiserror::Error;

/// Errors surfaced by the gateway (spec §4.2, §7).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unknown app: {0}")]
    UnknownApp(String),

    #[error("invalid session key: {0}")]
    InvalidSessionKey(String),

    #[error("store error: {0}")]
    Store(#[from] tentickle_store::StoreError),

    #[error("engine error: {0}")]
    Engine(#[from] tentickle_engine::EngineError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] tentickle_sandbox::SandboxError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::UnknownApp(_) => "UNKNOWN_APP",
            GatewayError::InvalidSessionKey(_) => "INVALID_SESSION_KEY",
            GatewayError::Store(_) => "DATABASE_ERROR",
            GatewayError::Engine(_) => "ENGINE_ERROR",
            GatewayError::Sandbox(_) => "SANDBOX_ERROR",
            GatewayError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

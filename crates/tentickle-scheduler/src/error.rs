use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("job not found: {id}")]
    JobNotFound { id: String },

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

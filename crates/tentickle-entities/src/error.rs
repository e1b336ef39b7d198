use thiserror::Error;

#[derive(Debug, Error)]
pub enum EntitiesError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store error: {0}")]
    Store(#[from] tentickle_store::StoreError),
}

pub type Result<T> = std::result::Result<T, EntitiesError>;

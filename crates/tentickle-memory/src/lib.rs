//! Hybrid FTS5 + vector memory store (spec §4.5): reciprocal rank fusion,
//! time decay, access-count boosting, and semantic dedup-on-write.

pub mod db;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod manager;
pub mod types;

pub use embedding::EmbeddingClient;
pub use error::{MemoryError, Result};
pub use manager::MemoryManager;
pub use types::{MemoryEntry, RecallHints, RecallResponse};

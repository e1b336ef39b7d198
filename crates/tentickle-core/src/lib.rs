//! Shared types, configuration, and error taxonomy used by every tentickle
//! crate: entity/session-key identifiers, the top-level config struct, and
//! the root error enum.

pub mod config;
pub mod error;
pub mod types;

pub use error::{CoreError, Result};

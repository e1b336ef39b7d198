//! Entity resolution: mapping external channel identities (Telegram user id,
//! Unix uid, a WS client's auth token subject, ...) onto the first-class
//! [`Entity`](tentickle_store::types::Entity) rows sessions and messages
//! reference (spec §3 DATA MODEL).
//!
//! Multi-user isolation beyond filesystem permissions is a named Non-goal
//! (spec §1) — this crate resolves *identity*, not *authorization*. Role,
//! budget, and capability policy are not modeled here.

pub mod db;
pub mod error;
pub mod resolver;

pub use error::{EntitiesError, Result};
pub use resolver::{EntityResolver, ResolvedEntity};

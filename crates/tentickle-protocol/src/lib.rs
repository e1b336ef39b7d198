//! Wire types for the tentickle gateway protocol: request/response/event
//! frames (spec §6), the `connect` handshake, and well-known method names.

pub mod frames;
pub mod handshake;
pub mod methods;

//! tentickle-sandbox — the `exec`/`mount`/`read` contract a session's
//! execution engine uses to touch the outside world.
//!
//! The engine treats the sandbox as an external collaborator: it only needs
//! `exec` (run a command, capture output, enforce a timeout and a safety
//! gate), `read` (read a workspace-relative file), and `mount` (bind a
//! session to a workspace root). This crate provides one concrete,
//! process-local implementation; a future remote/namespaced sandbox would
//! implement the same `Sandbox` trait.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use tentickle_sandbox::{LocalSandbox, Sandbox, ExecOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let sandbox = LocalSandbox::mount("/tmp/workspace");
//!     let result = sandbox.exec("echo hello", ExecOptions::default()).await.unwrap();
//!     println!("{}", result.stdout);
//! }
//! ```

pub mod error;
pub mod safety;
pub mod sandbox;
pub mod truncate;
pub mod types;

pub use error::{Result, SandboxError};
pub use sandbox::{LocalSandbox, Sandbox};
pub use types::{ExecOptions, ExecResult};

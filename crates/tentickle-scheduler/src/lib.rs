//! File-backed cron scheduling (spec §4.4): jobs persist as one JSON file
//! each, a per-job timer fires into a triggers directory, and a watcher
//! drains those trigger files into running sessions.

pub mod error;
pub mod job_store;
pub mod scheduler;
pub mod trigger_watcher;
pub mod types;

pub use error::{Result, SchedulerError};
pub use job_store::JobStore;
pub use scheduler::Scheduler;
pub use trigger_watcher::{TriggerSink, TriggerWatcher};
pub use types::{Job, Trigger};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cron-style schedule (spec §3 Job, §4.4). Persisted as one file per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Slugified name, suffixed on collision.
    pub id: String,
    pub name: String,
    pub cron: String,
    /// Session key the trigger is sent to; falls back to the watcher's
    /// default target when absent.
    pub target: Option<String>,
    pub prompt: String,
    /// When true, the job is deleted after its trigger is successfully
    /// delivered.
    pub oneshot: bool,
    pub enabled: bool,
    pub last_fired_at: Option<String>,
    /// May contain `heartbeatFile`, a path gating whether the job fires.
    #[serde(default)]
    pub metadata: Value,
}

/// A fired job instance, written to the triggers directory as
/// `<epochMs>-<jobId>.json` for chronological draining (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub job_id: String,
    pub job_name: String,
    pub target: Option<String>,
    pub prompt: String,
    pub fired_at: String,
    pub oneshot: bool,
}

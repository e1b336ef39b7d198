use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cron::Schedule as CronSchedule;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::job_store::JobStore;
use crate::types::{Job, Trigger};

struct TimerHandle {
    cron: String,
    task: JoinHandle<()>,
}

/// Holds one timer task per enabled job and re-syncs them against
/// [`JobStore`] changes: timers for vanished/disabled jobs are removed,
/// timers whose cron expression changed are recreated, new jobs get a new
/// timer, and unchanged jobs keep their existing timer (spec §4.4).
pub struct Scheduler {
    store: Arc<JobStore>,
    triggers_dir: PathBuf,
    timers: Mutex<HashMap<String, TimerHandle>>,
}

impl Scheduler {
    pub fn new(store: Arc<JobStore>, triggers_dir: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(&triggers_dir)?;
        Ok(Self {
            store,
            triggers_dir: triggers_dir.as_ref().to_path_buf(),
            timers: Mutex::new(HashMap::new()),
        })
    }

    /// Run the re-sync loop: an initial sync, then one more after every
    /// `JobStore` change notification. Runs until the store is dropped.
    pub async fn run(self: Arc<Self>) {
        self.resync();
        let mut changes = self.store.subscribe();
        loop {
            match changes.recv().await {
                Ok(()) => self.resync(),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => self.resync(),
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn resync(&self) {
        let jobs = match self.store.list_enabled() {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "failed to list jobs during resync");
                return;
            }
        };

        let mut timers = self.timers.lock().unwrap();
        let live_ids: HashSet<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        timers.retain(|id, handle| {
            if live_ids.contains(id.as_str()) {
                true
            } else {
                handle.task.abort();
                false
            }
        });

        for job in jobs {
            let needs_new = match timers.get(&job.id) {
                Some(existing) => existing.cron != job.cron,
                None => true,
            };
            if !needs_new {
                continue;
            }
            if let Some(old) = timers.remove(&job.id) {
                old.task.abort();
            }
            match self.spawn_timer(&job) {
                Ok(task) => {
                    timers.insert(job.id.clone(), TimerHandle { cron: job.cron.clone(), task });
                }
                Err(e) => warn!(job_id = %job.id, error = %e, "invalid cron expression; skipping"),
            }
        }
    }

    fn spawn_timer(&self, job: &Job) -> Result<JoinHandle<()>> {
        let schedule = CronSchedule::from_str(&six_field(&job.cron))
            .map_err(|e| crate::error::SchedulerError::InvalidCron(e.to_string()))?;
        let store = self.store.clone();
        let triggers_dir = self.triggers_dir.clone();
        let job_id = job.id.clone();

        Ok(tokio::spawn(async move {
            loop {
                let now = chrono::Utc::now();
                let next = match schedule.after(&now).next() {
                    Some(next) => next,
                    None => return,
                };
                let sleep_for = (next - now).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(sleep_for).await;

                // Re-read so a mutation between scheduling and firing applies.
                let current = match store.get(&job_id) {
                    Ok(Some(job)) if job.enabled => job,
                    Ok(_) => return, // resync will tear this task down
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "failed reloading job at fire time");
                        continue;
                    }
                };

                fire(&triggers_dir, &current);
            }
        }))
    }
}

/// The `cron` crate requires a leading seconds field; jobs are authored in
/// standard 5-field unix cron, so a 5-field expression fires at second 0.
fn six_field(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

/// Gate on the job's heartbeat file, if named, then write a trigger record.
fn fire(triggers_dir: &Path, job: &Job) {
    let heartbeat_path = job.metadata.get("heartbeatFile").and_then(|v| v.as_str());

    let extra = match heartbeat_path {
        Some(path) => match fs::read_to_string(path) {
            Ok(content) if !content.trim().is_empty() => Some(content),
            _ => {
                debug!(job_id = %job.id, "heartbeat gate suppressed trigger");
                return;
            }
        },
        None => None,
    };

    let prompt = match extra {
        Some(content) => format!("{}\n\n---\n\n{}", job.prompt, content.trim()),
        None => job.prompt.clone(),
    };

    let fired_at = chrono::Utc::now();
    let trigger = Trigger {
        job_id: job.id.clone(),
        job_name: job.name.clone(),
        target: job.target.clone(),
        prompt,
        fired_at: fired_at.to_rfc3339(),
        oneshot: job.oneshot,
    };

    let path = triggers_dir.join(format!("{}-{}.json", fired_at.timestamp_millis(), job.id));
    match serde_json::to_string(&trigger) {
        Ok(data) => {
            if let Err(e) = fs::write(&path, data) {
                warn!(job_id = %job.id, error = %e, "failed writing trigger file");
            }
        }
        Err(e) => warn!(job_id = %job.id, error = %e, "failed serializing trigger"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resync_creates_one_timer_per_enabled_job() {
        let jobs_dir = tempfile::tempdir().unwrap();
        let triggers_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open(jobs_dir.path()).unwrap());
        store
            .create("every-minute", "* * * * *", None, "go".into(), false, json!({}))
            .unwrap();

        let scheduler = Arc::new(Scheduler::new(store, triggers_dir.path()).unwrap());
        scheduler.resync();
        assert_eq!(scheduler.timers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resync_preserves_timer_identity_when_cron_unchanged() {
        let jobs_dir = tempfile::tempdir().unwrap();
        let triggers_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open(jobs_dir.path()).unwrap());
        let job = store
            .create("job", "* * * * *", None, "go".into(), false, json!({}))
            .unwrap();

        let scheduler = Arc::new(Scheduler::new(store.clone(), triggers_dir.path()).unwrap());
        scheduler.resync();
        let id_before = scheduler.timers.lock().unwrap().get(&job.id).unwrap().task.id();

        store.update(&job.id, |j| j.name = "renamed".into()).unwrap();
        scheduler.resync();
        let id_after = scheduler.timers.lock().unwrap().get(&job.id).unwrap().task.id();

        assert_eq!(id_before, id_after);
    }

    #[tokio::test]
    async fn fire_is_suppressed_when_heartbeat_file_missing() {
        let triggers_dir = tempfile::tempdir().unwrap();
        let job = Job {
            id: "hb".into(),
            name: "hb".into(),
            cron: "* * * * *".into(),
            target: None,
            prompt: "go".into(),
            oneshot: false,
            enabled: true,
            last_fired_at: None,
            metadata: json!({ "heartbeatFile": "/does/not/exist" }),
        };
        fire(triggers_dir.path(), &job);
        assert_eq!(fs::read_dir(triggers_dir.path()).unwrap().count(), 0);
    }
}

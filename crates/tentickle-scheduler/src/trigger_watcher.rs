use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::job_store::JobStore;
use crate::types::Trigger;

/// Delivers a fired trigger to wherever sessions live (spec §4.4: "calls
/// `Gateway.send(trigger.target || defaultTarget, ...)`"). Implemented by
/// `tentickle-gateway`'s `App` so this crate never depends on the gateway.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn deliver(&self, trigger: &Trigger) -> std::result::Result<(), String>;
}

/// Drains trigger files left by [`crate::scheduler::Scheduler`] in
/// chronological order and watches for new ones (spec §4.4). A file is
/// deleted once delivery succeeds; on failure it is left in place for a
/// later pass to retry. A `oneshot` job is deleted from the [`JobStore`]
/// once its trigger is delivered.
pub struct TriggerWatcher {
    dir: PathBuf,
    job_store: Arc<JobStore>,
    sink: Arc<dyn TriggerSink>,
    default_target: Option<String>,
}

impl TriggerWatcher {
    pub fn new(
        dir: impl AsRef<Path>,
        job_store: Arc<JobStore>,
        sink: Arc<dyn TriggerSink>,
        default_target: Option<String>,
    ) -> crate::error::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            job_store,
            sink,
            default_target,
        })
    }

    /// Drain whatever is already on disk, then watch for new trigger files
    /// until `cancel` fires. A file already being processed when `cancel`
    /// fires is allowed to finish — the loop only stops at the next file
    /// boundary, never mid-delivery.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        self.drain_existing().await;

        let (tx, mut rx) = mpsc::channel::<PathBuf>(256);
        let mut watcher = match notify::recommended_watcher(move |res: notify::Result<NotifyEvent>| {
            let Ok(event) = res else { return };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            for path in event.paths {
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    let _ = tx.blocking_send(path);
                }
            }
        }) {
            Ok(w) => w,
            Err(e) => {
                error!(error = %e, "failed to create trigger file watcher");
                return;
            }
        };

        if let Err(e) = watcher.watch(&self.dir, RecursiveMode::NonRecursive) {
            error!(error = %e, "failed to watch triggers directory");
            return;
        }

        let mut in_flight: HashSet<PathBuf> = HashSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("trigger watcher stopping");
                    break;
                }
                maybe_path = rx.recv() => {
                    let Some(path) = maybe_path else { break };
                    if !in_flight.insert(path.clone()) {
                        continue;
                    }
                    self.process_file(&path).await;
                    in_flight.remove(&path);
                }
            }
        }
    }

    async fn drain_existing(&self) {
        let mut entries: Vec<PathBuf> = match fs::read_dir(&self.dir) {
            Ok(read) => read
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed reading triggers directory");
                return;
            }
        };
        // Filenames are `<epochMs>-<jobId>.json`; lexicographic order on the
        // fixed-width millisecond prefix is chronological order.
        entries.sort();
        for path in entries {
            self.process_file(&path).await;
        }
    }

    async fn process_file(&self, path: &Path) {
        let data = match fs::read_to_string(path) {
            Ok(d) => d,
            Err(_) => return, // already consumed by a previous pass
        };
        let trigger: Trigger = match serde_json::from_str(&data) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed trigger file, leaving in place");
                return;
            }
        };

        let target = trigger.target.clone().or_else(|| self.default_target.clone());
        let Some(target) = target else {
            warn!(job_id = %trigger.job_id, "trigger has no target and no default configured; leaving file in place");
            return;
        };
        let mut routed = trigger.clone();
        routed.target = Some(target);

        match self.sink.deliver(&routed).await {
            Ok(()) => {
                if let Err(e) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "failed removing delivered trigger file");
                }
                if trigger.oneshot {
                    if let Err(e) = self.job_store.delete(&trigger.job_id) {
                        warn!(job_id = %trigger.job_id, error = %e, "failed deleting oneshot job");
                    }
                }
            }
            Err(e) => {
                warn!(job_id = %trigger.job_id, error = %e, "trigger delivery failed; file preserved for retry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingSink {
        delivered: Mutex<Vec<Trigger>>,
        fail_job_ids: Vec<String>,
    }

    #[async_trait]
    impl TriggerSink for RecordingSink {
        async fn deliver(&self, trigger: &Trigger) -> std::result::Result<(), String> {
            if self.fail_job_ids.contains(&trigger.job_id) {
                return Err("simulated failure".to_string());
            }
            self.delivered.lock().unwrap().push(trigger.clone());
            Ok(())
        }
    }

    fn write_trigger(dir: &Path, epoch_ms: u64, job_id: &str, oneshot: bool) {
        let trigger = Trigger {
            job_id: job_id.to_string(),
            job_name: job_id.to_string(),
            target: Some("main".to_string()),
            prompt: "go".to_string(),
            fired_at: chrono::Utc::now().to_rfc3339(),
            oneshot,
        };
        fs::write(
            dir.join(format!("{epoch_ms}-{job_id}.json")),
            serde_json::to_string(&trigger).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn drains_existing_triggers_in_timestamp_order() {
        let triggers_dir = tempfile::tempdir().unwrap();
        let jobs_dir = tempfile::tempdir().unwrap();
        write_trigger(triggers_dir.path(), 2000, "second", false);
        write_trigger(triggers_dir.path(), 1000, "first", false);

        let job_store = Arc::new(JobStore::open(jobs_dir.path()).unwrap());
        let sink = Arc::new(RecordingSink {
            delivered: Mutex::new(Vec::new()),
            fail_job_ids: vec![],
        });
        let watcher = Arc::new(
            TriggerWatcher::new(triggers_dir.path(), job_store, sink.clone(), None).unwrap(),
        );
        watcher.drain_existing().await;

        let delivered = sink.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].job_id, "first");
        assert_eq!(delivered[1].job_id, "second");
        assert_eq!(fs::read_dir(triggers_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failed_delivery_preserves_the_file() {
        let triggers_dir = tempfile::tempdir().unwrap();
        let jobs_dir = tempfile::tempdir().unwrap();
        write_trigger(triggers_dir.path(), 1000, "flaky", false);

        let job_store = Arc::new(JobStore::open(jobs_dir.path()).unwrap());
        let sink = Arc::new(RecordingSink {
            delivered: Mutex::new(Vec::new()),
            fail_job_ids: vec!["flaky".to_string()],
        });
        let watcher = Arc::new(
            TriggerWatcher::new(triggers_dir.path(), job_store, sink, None).unwrap(),
        );
        watcher.drain_existing().await;

        assert_eq!(fs::read_dir(triggers_dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn oneshot_job_is_deleted_after_successful_delivery() {
        let triggers_dir = tempfile::tempdir().unwrap();
        let jobs_dir = tempfile::tempdir().unwrap();
        let job_store = Arc::new(JobStore::open(jobs_dir.path()).unwrap());
        job_store
            .create("once", "* * * * *", None, "go".into(), true, json!({}))
            .unwrap();
        write_trigger(triggers_dir.path(), 1000, "once", true);

        let sink = Arc::new(RecordingSink {
            delivered: Mutex::new(Vec::new()),
            fail_job_ids: vec![],
        });
        let watcher = Arc::new(
            TriggerWatcher::new(triggers_dir.path(), job_store.clone(), sink, None).unwrap(),
        );
        watcher.drain_existing().await;

        assert!(job_store.get("once").unwrap().is_none());
    }
}

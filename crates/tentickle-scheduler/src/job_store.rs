use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::{Result, SchedulerError};
use crate::types::Job;

/// Persistent on-disk collection of [`Job`] records, one JSON file per job
/// (spec §4.4). Mutations broadcast on [`JobStore::subscribe`] so a
/// [`crate::scheduler::Scheduler`] can re-sync its timers.
pub struct JobStore {
    dir: PathBuf,
    on_change: broadcast::Sender<()>,
}

impl JobStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let (on_change, _) = broadcast::channel(32);
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            on_change,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.on_change.subscribe()
    }

    /// Create a job; the id is the slugified name, suffixed on collision,
    /// or a random id if the slug is empty (spec §4.4).
    pub fn create(
        &self,
        name: &str,
        cron: &str,
        target: Option<String>,
        prompt: String,
        oneshot: bool,
        metadata: Value,
    ) -> Result<Job> {
        let id = self.unique_slug(name);
        let job = Job {
            id,
            name: name.to_string(),
            cron: cron.to_string(),
            target,
            prompt,
            oneshot,
            enabled: true,
            last_fired_at: None,
            metadata,
        };
        self.write(&job)?;
        let _ = self.on_change.send(());
        Ok(job)
    }

    pub fn update(&self, id: &str, f: impl FnOnce(&mut Job)) -> Result<Job> {
        let mut job = self
            .get(id)?
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
        f(&mut job);
        self.write(&job)?;
        let _ = self.on_change.send(());
        Ok(job)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        let _ = self.on_change.send(());
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Job>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// List every job. Malformed files are skipped, not fatal (spec §4.4).
    pub fn list(&self) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .ok()
                .and_then(|s| serde_json::from_str::<Job>(&s).ok())
            {
                Some(job) => jobs.push(job),
                None => warn!(path = %path.display(), "skipping malformed job file"),
            }
        }
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }

    pub fn list_enabled(&self) -> Result<Vec<Job>> {
        Ok(self.list()?.into_iter().filter(|j| j.enabled).collect())
    }

    fn unique_slug(&self, name: &str) -> String {
        let base = slug::slugify(name);
        let base = if base.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            base
        };
        if !self.path_for(&base).exists() {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}-{n}");
            if !self.path_for(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn write(&self, job: &Job) -> Result<()> {
        let data = serde_json::to_string_pretty(job)?;
        fs::write(self.path_for(&job.id), data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_slugifies_and_dedupes_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path()).unwrap();

        let a = store.create("Daily Standup", "0 9 * * *", None, "go".into(), false, json!({})).unwrap();
        assert_eq!(a.id, "daily-standup");

        let b = store.create("Daily Standup", "0 10 * * *", None, "go".into(), false, json!({})).unwrap();
        assert_eq!(b.id, "daily-standup-2");
    }

    #[test]
    fn malformed_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        store.create("ok", "0 9 * * *", None, "go".into(), false, json!({})).unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let jobs = store.list().unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[test]
    fn update_then_delete_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        let job = store.create("job", "0 9 * * *", None, "go".into(), false, json!({})).unwrap();

        store.update(&job.id, |j| j.enabled = false).unwrap();
        assert!(!store.get(&job.id).unwrap().unwrap().enabled);

        store.delete(&job.id).unwrap();
        assert!(store.get(&job.id).unwrap().is_none());
    }
}

//! Reactive knob map (spec glossary "Knob": "a named reactive value in a
//! session's component tree, persisted in `session_snapshots`"; spec §9:
//! "state is a plain keyed map ... with change notifications").
//!
//! Compaction's `ref:<index>` expansion knobs (spec §4.6) and any future
//! component state live here. A knob set is flushed to
//! `session_snapshots` via [`KnobMap::to_value`]/[`KnobMap::from_value`].

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::watch;

/// Key used in `session_snapshots.key` for the knob map blob.
pub const KNOBS_SNAPSHOT_KEY: &str = "knobs";

/// A reactive keyed state map. Setting a value bumps a `watch` channel so
/// any render loop awaiting knob changes wakes up; readers only care about
/// the latest value at the next render, so `watch` (not `mpsc`) is the
/// right primitive — matches the teacher's `tokio::sync::watch` usage for
/// single-slot reactive config elsewhere in this corpus.
pub struct KnobMap {
    values: HashMap<String, Value>,
    changed_tx: watch::Sender<u64>,
    version: u64,
}

impl Default for KnobMap {
    fn default() -> Self {
        Self::new()
    }
}

impl KnobMap {
    pub fn new() -> Self {
        let (changed_tx, _rx) = watch::channel(0);
        Self {
            values: HashMap::new(),
            changed_tx,
            version: 0,
        }
    }

    pub fn from_value(value: &Value) -> Self {
        let mut map = Self::new();
        if let Value::Object(obj) = value {
            for (k, v) in obj {
                map.values.insert(k.clone(), v.clone());
            }
        }
        map
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.values.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
        self.version += 1;
        let _ = self.changed_tx.send(self.version);
    }

    /// Clear a knob (used for one-shot knobs like `ref:<index>` which reset
    /// each execution per spec §4.6).
    pub fn clear(&mut self, key: &str) {
        if self.values.remove(key).is_some() {
            self.version += 1;
            let _ = self.changed_tx.send(self.version);
        }
    }

    /// Remove every knob matching `prefix` — used to reset all `ref:<n>`
    /// expansion knobs at the start of a new execution (spec §4.6: "resets
    /// each execution").
    pub fn clear_prefixed(&mut self, prefix: &str) {
        let stale: Vec<String> = self
            .values
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for k in stale {
            self.values.remove(&k);
        }
        self.version += 1;
        let _ = self.changed_tx.send(self.version);
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed_tx.subscribe()
    }
}

/// The one-shot expansion knob name for a compacted timeline entry at
/// `index` (spec §4.6 `ref:<index>`).
pub fn ref_knob(index: usize) -> String {
    format!("ref:{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_roundtrip() {
        let mut knobs = KnobMap::new();
        knobs.set("ref:2", Value::Bool(true));
        assert!(knobs.get_bool("ref:2"));
    }

    #[test]
    fn clear_prefixed_resets_expansion_knobs() {
        let mut knobs = KnobMap::new();
        knobs.set(ref_knob(1), Value::Bool(true));
        knobs.set(ref_knob(3), Value::Bool(true));
        knobs.set("other", Value::Bool(true));
        knobs.clear_prefixed("ref:");
        assert!(!knobs.get_bool("ref:1"));
        assert!(!knobs.get_bool("ref:3"));
        assert!(knobs.get_bool("other"));
    }

    #[test]
    fn value_roundtrip_through_json() {
        let mut knobs = KnobMap::new();
        knobs.set("a", serde_json::json!(42));
        let value = knobs.to_value();
        let restored = KnobMap::from_value(&value);
        assert_eq!(restored.get("a"), Some(&serde_json::json!(42)));
    }
}

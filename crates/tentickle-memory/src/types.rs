use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A recallable fact (spec §3 MemoryEntry). The companion embedding vector
/// lives in a separate virtual table keyed by `id`, partitioned by
/// `namespace` (spec §3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub namespace: String,
    pub content: String,
    pub topic: Option<String>,
    /// Importance in `[0, 1]`.
    pub importance: f64,
    pub metadata: Value,
    pub source_session_id: Option<String>,
    pub access_count: u64,
    pub last_accessed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One scored hit returned from `recall` (spec §4.5 step 4/5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub entry: MemoryEntry,
    /// Normalized to `(0, 1]`; the top result is exactly 1.
    pub score: f64,
}

/// Topic name paired with how many memories in the namespace carry it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicCount {
    pub topic: String,
    pub count: u64,
}

/// Discovery hints returned alongside every `recall` (spec §4.5 step 7).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecallHints {
    /// Distinct non-null topics among the returned results.
    pub matched_topics: Vec<String>,
    /// Distinct topics from vector overflow not already in `matched_topics`
    /// (empty when a topic filter is active).
    pub related_topics: Vec<String>,
    /// All topics in the namespace with counts, top 50 desc.
    pub topic_map: Vec<TopicCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecallResponse {
    pub entries: Vec<ScoredMemory>,
    pub hints: RecallHints,
}

#[derive(Debug, Clone, Default)]
pub struct RecallOptions {
    pub namespace: String,
    pub topic: Option<String>,
    pub limit: usize,
    /// Time-decay lambda override for this call; `None` uses the manager's
    /// configured default (spec §4.5 step 5).
    pub decay_lambda: Option<f64>,
}

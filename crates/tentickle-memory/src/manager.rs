use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::db;
use crate::embedding::EmbeddingClient;
use crate::error::Result;
use crate::fusion::{self, DEFAULT_DECAY_LAMBDA};
use crate::types::{MemoryEntry, RecallHints, RecallOptions, RecallResponse, ScoredMemory, TopicCount};

/// Tuning knobs for a `MemoryManager` (spec §4.5).
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub vector_dim: usize,
    /// Cosine similarity at/above which `remember` merges into an existing
    /// entry instead of inserting a new one. `0.0` disables dedup.
    pub dedup_threshold: f64,
    pub decay_lambda: f64,
    /// How many un-embedded rows the backfill task embeds per sweep.
    pub backfill_batch_size: usize,
    pub backfill_interval: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            vector_dim: 768,
            dedup_threshold: 0.90,
            decay_lambda: DEFAULT_DECAY_LAMBDA,
            backfill_batch_size: 10,
            backfill_interval: Duration::from_secs(30),
        }
    }
}

/// Hybrid FTS5 + vector memory store (spec §4.5). The relational row is
/// written synchronously; the embedding is fire-and-forget, tracked via
/// `memories_pending_embed` until a background task or inline retry lands it.
pub struct MemoryManager {
    db: Arc<Mutex<Connection>>,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    config: MemoryConfig,
}

impl MemoryManager {
    /// `conn` must already have pragmas applied and `tentickle_store`'s
    /// schema present if it shares a database file with the store. Pass
    /// `embedder = None` to run FTS-only (vector search disabled).
    pub fn new(
        mut conn: Connection,
        embedder: Option<Arc<dyn EmbeddingClient>>,
        config: MemoryConfig,
    ) -> Result<Self> {
        if embedder.is_some() {
            db::register_vec_extension();
        }
        db::ensure_schema(&mut conn)?;
        if embedder.is_some() {
            db::ensure_vec_table(&conn, config.vector_dim)?;
        }
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            embedder,
            config,
        })
    }

    /// Persist a new memory. Returns as soon as the relational row commits;
    /// embedding (and dedup) happens in the background when vector search
    /// is enabled (spec §4.5).
    #[instrument(skip(self, content, metadata), fields(namespace))]
    pub fn remember(
        &self,
        namespace: &str,
        content: &str,
        topic: Option<&str>,
        importance: f64,
        metadata: Value,
        source_session_id: Option<&str>,
    ) -> Result<MemoryEntry> {
        let now = chrono::Utc::now().to_rfc3339();
        let entry = MemoryEntry {
            id: uuid::Uuid::now_v7().to_string(),
            namespace: namespace.to_string(),
            content: content.to_string(),
            topic: topic.map(str::to_string),
            importance,
            metadata,
            source_session_id: source_session_id.map(str::to_string),
            access_count: 0,
            last_accessed_at: None,
            created_at: now.clone(),
            updated_at: now.clone(),
        };

        {
            let conn = self.db.lock().unwrap();
            conn.execute(
                "INSERT INTO memories
                 (id, namespace, content, topic, importance, metadata, source_session_id,
                  access_count, last_accessed_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, ?8, ?8)",
                params![
                    entry.id,
                    entry.namespace,
                    entry.content,
                    entry.topic,
                    entry.importance,
                    entry.metadata.to_string(),
                    entry.source_session_id,
                    now,
                ],
            )?;

            if self.embedder.is_some() {
                conn.execute(
                    "INSERT INTO memories_pending_embed (memory_id, enqueued_at) VALUES (?1, ?2)",
                    params![entry.id, now],
                )?;
            }
        }

        if let Some(embedder) = self.embedder.clone() {
            let db = self.db.clone();
            let config = self.config.clone();
            let id = entry.id.clone();
            tokio::spawn(async move {
                if let Err(e) = embed_and_dedup(&db, embedder.as_ref(), &config, &id).await {
                    warn!(memory_id = %id, error = %e, "embedding failed; left for backfill");
                }
            });
        }

        Ok(entry)
    }

    /// Implements the seven-step recall algorithm (spec §4.5).
    #[instrument(skip(self, query), fields(namespace = %opts.namespace))]
    pub async fn recall(&self, query: &str, opts: RecallOptions) -> Result<RecallResponse> {
        let limit = if opts.limit == 0 { 10 } else { opts.limit };
        let lambda = opts.decay_lambda.unwrap_or(self.config.decay_lambda);
        let query = query.trim();

        if query.is_empty() {
            let topic_map = self.topic_map(&opts.namespace)?;
            return Ok(RecallResponse {
                entries: Vec::new(),
                hints: RecallHints {
                    matched_topics: Vec::new(),
                    related_topics: Vec::new(),
                    topic_map,
                },
            });
        }

        let fts_ranked = self.fts_search(query, &opts.namespace, opts.topic.as_deref())?;

        let (vec_ranked, vector_overflow_ids) = if let Some(embedder) = &self.embedder {
            match embedder.embed(query).await {
                Ok(vec) => match self.vector_search(&vec, &opts.namespace, limit * 3) {
                    Ok(ranked) => {
                        let overflow: Vec<String> =
                            ranked.iter().skip(limit).map(|(id, _)| id.clone()).collect();
                        (ranked.into_iter().map(|(id, _)| id).collect(), overflow)
                    }
                    Err(e) => {
                        warn!(error = %e, "vector search failed; degrading to FTS-only");
                        (Vec::new(), Vec::new())
                    }
                },
                Err(e) => {
                    warn!(error = %e, "query embedding failed; degrading to FTS-only");
                    (Vec::new(), Vec::new())
                }
            }
        } else {
            (Vec::new(), Vec::new())
        };

        let fts_ids: Vec<String> = fts_ranked.iter().map(|(id, _)| id.clone()).collect();
        let mut fused = fusion::fuse_rankings(&fts_ids, &vec_ranked);
        fused.truncate(limit);
        fusion::normalize_scores(&mut fused);

        let entries_by_id = self.load_entries(fused.iter().map(|(id, _)| id.as_str()))?;

        let now = chrono::Utc::now();
        let mut scored: Vec<(String, f64)> = fused
            .into_iter()
            .filter(|(id, _)| entries_by_id.contains_key(id))
            .map(|(id, fused_score)| {
                let entry = &entries_by_id[&id];
                let age_days = age_days(entry, &now);
                let post = fusion::post_score(fused_score, age_days, entry.access_count, lambda);
                (id, post)
            })
            .collect();
        fusion::normalize_scores(&mut scored);

        if !scored.is_empty() {
            self.bump_access(scored.iter().map(|(id, _)| id.as_str()))?;
        }

        let mut matched_topics: Vec<String> = Vec::new();
        let mut entries = Vec::with_capacity(scored.len());
        for (id, score) in scored {
            let mut entry = entries_by_id[&id].clone();
            entry.access_count += 1;
            if let Some(topic) = &entry.topic {
                if !matched_topics.contains(topic) {
                    matched_topics.push(topic.clone());
                }
            }
            entries.push(ScoredMemory { entry, score });
        }

        let related_topics = if opts.topic.is_some() {
            Vec::new()
        } else {
            let overflow_entries = self.load_entries(vector_overflow_ids.iter().map(String::as_str))?;
            let mut related = Vec::new();
            for entry in overflow_entries.values() {
                if let Some(topic) = &entry.topic {
                    if !matched_topics.contains(topic) && !related.contains(topic) {
                        related.push(topic.clone());
                    }
                }
            }
            related
        };

        let topic_map = self.topic_map(&opts.namespace)?;

        Ok(RecallResponse {
            entries,
            hints: RecallHints {
                matched_topics,
                related_topics,
                topic_map,
            },
        })
    }

    /// Total memories currently stored in `namespace` (used by tests/tools).
    pub fn count(&self, namespace: &str) -> Result<u64> {
        let conn = self.db.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE namespace = ?1",
            params![namespace],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn forget(&self, id: &str) -> Result<bool> {
        let conn = self.db.lock().unwrap();
        let rows = conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        if self.embedder.is_some() {
            conn.execute("DELETE FROM memories_vec WHERE memory_id = ?1", params![id])
                .ok();
        }
        Ok(rows > 0)
    }

    /// Spawn the backfill task: periodically embeds memories left pending
    /// after `remember` (started only when vector search is enabled).
    pub fn spawn_backfill(manager: Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let embedder = manager.embedder.clone()?;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.backfill_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = manager.backfill_once(embedder.as_ref()).await {
                    warn!(error = %e, "backfill sweep failed");
                }
            }
        }))
    }

    async fn backfill_once(&self, embedder: &dyn EmbeddingClient) -> Result<()> {
        let pending: Vec<String> = {
            let conn = self.db.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT memory_id FROM memories_pending_embed ORDER BY enqueued_at LIMIT ?1",
            )?;
            stmt.query_map(params![self.config.backfill_batch_size as i64], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect()
        };
        if pending.is_empty() {
            return Ok(());
        }
        debug!(count = pending.len(), "backfilling memory embeddings");
        for id in pending {
            if let Err(e) = embed_and_dedup(&self.db, embedder, &self.config, &id).await {
                warn!(memory_id = %id, error = %e, "backfill embed failed");
            }
        }
        Ok(())
    }

    fn fts_search(&self, query: &str, namespace: &str, topic: Option<&str>) -> Result<Vec<(String, f64)>> {
        let match_expr = query
            .split_whitespace()
            .map(|tok| format!("\"{}\"", tok.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" OR ");
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT m.id, bm25(memories_fts) as rnk
             FROM memories_fts
             JOIN memories m ON m.rowid = memories_fts.rowid
             WHERE memories_fts MATCH ?1 AND m.namespace = ?2
               AND (?3 IS NULL OR m.topic = ?3)
             ORDER BY rnk
             LIMIT 200",
        )?;
        let rows = stmt
            .query_map(params![match_expr, namespace, topic], |row| {
                let id: String = row.get(0)?;
                let rank: f64 = row.get(1)?;
                Ok((id, -rank / (-rank + 1.0)))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn vector_search(&self, query_vec: &[f32], namespace: &str, k: usize) -> Result<Vec<(String, f64)>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT memory_id, distance FROM memories_vec
             WHERE namespace = ?1 AND embedding MATCH vec_f32(?2) AND k = ?3
             ORDER BY distance",
        )?;
        let json_vec = serde_json::to_string(query_vec)?;
        let rows = stmt
            .query_map(params![namespace, json_vec, k as i64], |row| {
                let id: String = row.get(0)?;
                let distance: f64 = row.get(1)?;
                Ok((id, 1.0 - distance))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn load_entries<'a>(&self, ids: impl Iterator<Item = &'a str>) -> Result<HashMap<String, MemoryEntry>> {
        let ids: Vec<&str> = ids.collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.db.lock().unwrap();
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT id, namespace, content, topic, importance, metadata, source_session_id,
                    access_count, last_accessed_at, created_at, updated_at
             FROM memories WHERE id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params.as_slice(), row_to_entry)?;
        let mut map = HashMap::new();
        for row in rows {
            let entry = row?;
            map.insert(entry.id.clone(), entry);
        }
        Ok(map)
    }

    fn bump_access<'a>(&self, ids: impl Iterator<Item = &'a str>) -> Result<()> {
        let ids: Vec<&str> = ids.collect();
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?1
             WHERE id IN ({placeholders})"
        );
        let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&now];
        params_vec.extend(ids.iter().map(|s| s as &dyn rusqlite::ToSql));
        conn.execute(&sql, params_vec.as_slice())?;
        Ok(())
    }

    fn topic_map(&self, namespace: &str) -> Result<Vec<TopicCount>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT topic, COUNT(*) as n FROM memories
             WHERE namespace = ?1 AND topic IS NOT NULL
             GROUP BY topic ORDER BY n DESC LIMIT 50",
        )?;
        let rows = stmt
            .query_map(params![namespace], |row| {
                Ok(TopicCount {
                    topic: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

/// Manual `Clone` since `dyn EmbeddingClient` isn't `Clone`; both fields are
/// already reference-counted or cheap to clone.
impl Clone for MemoryManager {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            embedder: self.embedder.clone(),
            config: self.config.clone(),
        }
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let metadata_str: String = row.get(5)?;
    Ok(MemoryEntry {
        id: row.get(0)?,
        namespace: row.get(1)?,
        content: row.get(2)?,
        topic: row.get(3)?,
        importance: row.get(4)?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(Value::Null),
        source_session_id: row.get(6)?,
        access_count: row.get::<_, i64>(7)? as u64,
        last_accessed_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn age_days(entry: &MemoryEntry, now: &chrono::DateTime<chrono::Utc>) -> f64 {
    let reference = entry
        .last_accessed_at
        .as_deref()
        .or(Some(entry.created_at.as_str()))
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc));
    match reference {
        Some(dt) => (*now - dt).num_milliseconds() as f64 / 86_400_000.0,
        None => 0.0,
    }
}

/// Embeds one pending memory, writes its vector, then checks for a
/// near-duplicate to merge into (spec §4.5 "Dedup on remember"). Runs
/// standalone (not `&self`) so it can be spawned without borrowing the
/// manager past its lifetime.
async fn embed_and_dedup(
    db: &Arc<Mutex<Connection>>,
    embedder: &dyn EmbeddingClient,
    config: &MemoryConfig,
    id: &str,
) -> Result<()> {
    let (namespace, content) = {
        let conn = db.lock().unwrap();
        conn.query_row(
            "SELECT namespace, content FROM memories WHERE id = ?1",
            params![id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?
    };

    let vector = embedder.embed(&content).await?;
    let json_vec = serde_json::to_string(&vector)?;

    let dup_match = if config.dedup_threshold > 0.0 {
        let conn = db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT memory_id, distance FROM memories_vec
             WHERE namespace = ?1 AND embedding MATCH vec_f32(?2) AND k = 5
             ORDER BY distance",
        )?;
        let rows: Vec<(String, f64)> = stmt
            .query_map(params![namespace, json_vec], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .filter_map(|r| r.ok())
            .filter(|(other_id, _)| other_id != id)
            .collect();
        rows.into_iter()
            .find(|(_, distance)| 1.0 - distance >= config.dedup_threshold)
    } else {
        None
    };

    let conn = db.lock().unwrap();
    match dup_match {
        Some((existing_id, _)) => {
            let now = chrono::Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE memories SET content = ?1, updated_at = ?2 WHERE id = ?3",
                params![content, now, existing_id],
            )?;
            conn.execute(
                "UPDATE memories_vec SET embedding = vec_f32(?1) WHERE memory_id = ?2",
                params![json_vec, existing_id],
            )?;
            conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
            conn.execute("DELETE FROM memories_vec WHERE memory_id = ?1", params![id])
                .ok();
            info!(merged_into = %existing_id, duplicate = %id, "deduped memory on write");
        }
        None => {
            conn.execute(
                "INSERT INTO memories_vec (memory_id, namespace, embedding) VALUES (?1, ?2, vec_f32(?3))",
                params![id, namespace, json_vec],
            )?;
        }
    }
    conn.execute("DELETE FROM memories_pending_embed WHERE memory_id = ?1", params![id])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EchoEmbeddingClient;
    use serde_json::json;

    fn fts_only_manager() -> MemoryManager {
        let conn = Connection::open_in_memory().unwrap();
        MemoryManager::new(conn, None, MemoryConfig::default()).unwrap()
    }

    fn hybrid_manager(dim: usize) -> Arc<MemoryManager> {
        db::register_vec_extension();
        let conn = Connection::open_in_memory().unwrap();
        let config = MemoryConfig {
            vector_dim: dim,
            ..MemoryConfig::default()
        };
        Arc::new(
            MemoryManager::new(conn, Some(Arc::new(EchoEmbeddingClient::new(dim))), config).unwrap(),
        )
    }

    #[tokio::test]
    async fn empty_query_returns_topic_map_only() {
        let mgr = fts_only_manager();
        mgr.remember("default", "Ryan likes pizza", Some("food"), 0.5, json!({}), None)
            .unwrap();
        let resp = mgr
            .recall("", RecallOptions { namespace: "default".into(), ..Default::default() })
            .await
            .unwrap();
        assert!(resp.entries.is_empty());
        assert_eq!(resp.hints.topic_map[0].topic, "food");
    }

    #[tokio::test]
    async fn fts_only_recall_finds_match_and_bumps_access() {
        let mgr = fts_only_manager();
        mgr.remember("default", "Ryan prefers TypeScript", None, 0.5, json!({}), None)
            .unwrap();

        let resp = mgr
            .recall(
                "TypeScript",
                RecallOptions { namespace: "default".into(), limit: 5, ..Default::default() },
            )
            .await
            .unwrap();

        assert_eq!(resp.entries.len(), 1);
        assert_eq!(resp.entries[0].score, 1.0);
        assert_eq!(resp.entries[0].entry.access_count, 1);
    }

    #[tokio::test]
    async fn hybrid_recall_dedupes_near_duplicate_on_write() {
        let mgr = hybrid_manager(16);
        mgr.remember("default", "Ryan prefers TypeScript", None, 0.5, json!({}), None)
            .unwrap();
        // allow the fire-and-forget embed task to land
        tokio::time::sleep(Duration::from_millis(50)).await;
        mgr.remember("default", "Ryan prefers TypeScript", None, 0.5, json!({}), None)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(mgr.count("default").unwrap(), 1);
    }
}

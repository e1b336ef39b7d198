use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use tracing::{debug, instrument};

use crate::error::{Result, StoreError};
use crate::schema;
use crate::snapshot::{self, SessionSnapshotView};
use crate::types::{
    Entity, ExecutionStatus, ExecutionTrigger, Message, Session, SessionStatus, SessionType, Usage,
};
use crate::writers;
use tentickle_core::types::SessionKey;

/// Thread-safe facade over the SQLite-backed persistence store (spec §4.3).
/// All writes serialize through a single connection in WAL mode (spec §5).
pub struct Store {
    db: Mutex<Connection>,
}

impl Store {
    /// Open (creating if necessary) the database at `path`, apply pragmas,
    /// run migrations, and mark any executions orphaned by a prior crash
    /// as failed (spec §8 property 2 / scenario S2).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        schema::apply_pragmas(&conn)?;
        schema::ensure_schema(&mut conn)?;
        let crashed = writers::mark_crashed_executions(&conn)?;
        if crashed > 0 {
            debug!(count = crashed, "marked crashed executions as failed");
        }
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        schema::apply_pragmas(&conn)?;
        schema::ensure_schema(&mut conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    #[instrument(skip(self))]
    pub fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO entities (id, type, name, summary, is_owner, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, summary = excluded.summary,
                metadata = excluded.metadata, updated_at = excluded.updated_at",
            params![
                entity.id.as_str(),
                entity.entity_type.to_string(),
                entity.name,
                entity.summary,
                entity.is_owner as i64,
                entity.metadata.to_string(),
                entity.created_at,
                entity.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Return an existing session for `key` or create a new one, scoped to
    /// `owner_entity_id` and rooted at `workspace_path`.
    #[instrument(skip(self), fields(key = %key))]
    pub fn get_or_create_session(
        &self,
        key: &SessionKey,
        owner_entity_id: &str,
        workspace_path: &str,
    ) -> Result<Session> {
        if let Some(session) = self.get_session_by_key(key)? {
            return Ok(session);
        }

        let id = writers::new_id();
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO sessions
             (id, session_key, type, workspace_path, status, owner_entity_id, tick,
              schema_version, created_at, updated_at)
             VALUES (?1, ?2, 'chat', ?3, 'active', ?4, 0, 1, ?5, ?5)",
            params![id, key.to_string(), workspace_path, owner_entity_id, now],
        )?;
        drop(db);

        self.get_session_by_key(key)?
            .ok_or_else(|| StoreError::SessionNotFound {
                key: key.to_string(),
            })
    }

    #[instrument(skip(self), fields(key = %key))]
    pub fn get_session_by_key(&self, key: &SessionKey) -> Result<Option<Session>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, session_key, parent_id, fork_after_message_id, type, workspace_path,
                    status, owner_entity_id, tick, schema_version, created_at, updated_at
             FROM sessions WHERE session_key = ?1",
            params![key.to_string()],
            row_to_session,
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    pub fn list_sessions_for_owner(&self, owner_entity_id: &str, limit: usize) -> Result<Vec<Session>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, session_key, parent_id, fork_after_message_id, type, workspace_path,
                    status, owner_entity_id, tick, schema_version, created_at, updated_at
             FROM sessions
             WHERE owner_entity_id = ?1
             ORDER BY updated_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![owner_entity_id, limit as i64], row_to_session)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn create_execution(
        &self,
        execution_id: &str,
        session_id: &str,
        trigger: ExecutionTrigger,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        writers::create_execution(&db, execution_id, session_id, trigger)
    }

    pub fn record_tick_start(&self, execution_id: &str, tick: u32) -> Result<()> {
        let db = self.db.lock().unwrap();
        writers::record_tick_start(&db, execution_id, tick)
    }

    pub fn commit_entry(&self, message: &Message) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        writers::commit_entry(&mut db, message)
    }

    pub fn record_tick_end(
        &self,
        execution_id: &str,
        tick: u32,
        model: &str,
        usage: &Usage,
        stop_reason: &str,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        writers::record_tick_end(&db, execution_id, tick, model, usage, stop_reason)
    }

    pub fn complete_execution(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        tick_count: u32,
        error_message: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        writers::complete_execution(&db, execution_id, status, tick_count, error_message)
    }

    pub fn save_snapshot(&self, snapshot: &SessionSnapshotView) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        snapshot::save(&mut db, snapshot)
    }

    pub fn load_snapshot(&self, session_id: &str) -> Result<Option<SessionSnapshotView>> {
        let db = self.db.lock().unwrap();
        snapshot::load(&db, session_id)
    }

    /// Delete a session; cascades to its messages, blocks, executions,
    /// ticks, and snapshots (spec §8 property 5).
    #[instrument(skip(self))]
    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let rows = db.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        if rows == 0 {
            return Err(StoreError::SessionNotFound {
                key: session_id.to_string(),
            });
        }
        Ok(())
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let key_str: String = row.get(1)?;
    let key = SessionKey::parse(&key_str).unwrap_or_else(|_| SessionKey::unscoped(key_str));
    let type_str: String = row.get(4)?;
    let status_str: String = row.get(6)?;
    Ok(Session {
        id: row.get(0)?,
        key,
        parent_id: row.get(2)?,
        fork_after_message_id: row.get(3)?,
        session_type: type_str.parse::<SessionType>().unwrap_or(SessionType::Chat),
        workspace_path: row.get(5)?,
        status: status_str
            .parse::<SessionStatus>()
            .unwrap_or(SessionStatus::Active),
        owner_entity_id: row.get(7)?,
        tick: row.get::<_, i64>(8)? as u32,
        schema_version: row.get::<_, i64>(9)? as u32,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockType, ContentBlock, MessageRole, Visibility};
    use tentickle_core::types::{EntityId, EntityType};

    fn test_entity(store: &Store) -> String {
        let id = EntityId::new();
        store
            .upsert_entity(&Entity {
                id: id.clone(),
                entity_type: EntityType::Person,
                name: "ryan".into(),
                summary: None,
                is_owner: true,
                metadata: serde_json::json!({}),
                created_at: chrono::Utc::now().to_rfc3339(),
                updated_at: chrono::Utc::now().to_rfc3339(),
            })
            .unwrap();
        id.as_str().to_string()
    }

    #[test]
    fn get_or_create_session_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let owner = test_entity(&store);
        let key = SessionKey::unscoped("main");

        let a = store.get_or_create_session(&key, &owner, "/tmp/ws").unwrap();
        let b = store.get_or_create_session(&key, &owner, "/tmp/ws").unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn commit_entry_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let owner = test_entity(&store);
        let key = SessionKey::unscoped("main");
        let session = store.get_or_create_session(&key, &owner, "/tmp/ws").unwrap();

        let exec_id = writers::new_id();
        store
            .create_execution(&exec_id, &session.id, ExecutionTrigger::Send)
            .unwrap();
        store.record_tick_start(&exec_id, 0).unwrap();

        let message_id = writers::new_id();
        let msg = Message {
            id: message_id.clone(),
            session_id: session.id.clone(),
            execution_id: Some(exec_id.clone()),
            entity_id: Some(owner.clone()),
            role: MessageRole::User,
            tick: 0,
            sequence_in_tick: 0,
            text_preview: Some("hello".into()),
            visibility: Visibility::Model,
            tags: vec![],
            token_count: 1,
            metadata: serde_json::json!({}),
            created_at: chrono::Utc::now().to_rfc3339(),
            blocks: vec![ContentBlock {
                id: writers::new_id(),
                message_id,
                position: 0,
                block_type: BlockType::Text,
                text_content: Some("hello".into()),
                content_json: serde_json::json!({"text": "hello"}),
                metadata: serde_json::json!({}),
            }],
        };
        store.commit_entry(&msg).unwrap();
        store.commit_entry(&msg).unwrap();

        let loaded = store.load_snapshot(&session.id).unwrap().unwrap();
        assert_eq!(loaded.timeline.len(), 1);
        assert_eq!(loaded.timeline[0].blocks.len(), 1);
    }

    #[test]
    fn fk_violation_on_orphan_message() {
        let store = Store::open_in_memory().unwrap();
        let msg = Message {
            id: writers::new_id(),
            session_id: "nonexistent".into(),
            execution_id: None,
            entity_id: None,
            role: MessageRole::User,
            tick: 0,
            sequence_in_tick: 0,
            text_preview: None,
            visibility: Visibility::Model,
            tags: vec![],
            token_count: 0,
            metadata: serde_json::json!({}),
            created_at: chrono::Utc::now().to_rfc3339(),
            blocks: vec![],
        };
        assert!(store.commit_entry(&msg).is_err());
    }

    #[test]
    fn delete_session_cascades() {
        let store = Store::open_in_memory().unwrap();
        let owner = test_entity(&store);
        let key = SessionKey::unscoped("main");
        let session = store.get_or_create_session(&key, &owner, "/tmp/ws").unwrap();

        let exec_id = writers::new_id();
        store
            .create_execution(&exec_id, &session.id, ExecutionTrigger::Send)
            .unwrap();

        store.delete_session(&session.id).unwrap();
        assert!(store.load_snapshot(&session.id).unwrap().is_none());
    }

    #[test]
    fn crash_recovery_marks_running_executions_failed() {
        let store = Store::open_in_memory().unwrap();
        let owner = test_entity(&store);
        let key = SessionKey::unscoped("main");
        let session = store.get_or_create_session(&key, &owner, "/tmp/ws").unwrap();
        let exec_id = writers::new_id();
        store
            .create_execution(&exec_id, &session.id, ExecutionTrigger::Send)
            .unwrap();

        let db = store.db.lock().unwrap();
        let marked = writers::mark_crashed_executions(&db).unwrap();
        assert_eq!(marked, 1);
    }
}

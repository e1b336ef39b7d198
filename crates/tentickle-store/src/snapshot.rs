use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::instrument;

use crate::error::Result;
use crate::types::{
    BlockType, ContentBlock, Message, MessageRole, Session, SessionStatus, SessionType, Usage,
    Visibility,
};

/// A session loaded in full, plus its derived usage aggregate (spec §4.3).
#[derive(Debug, Clone)]
pub struct SessionSnapshotView {
    pub session: Session,
    pub timeline: Vec<Message>,
    pub com_state: Value,
    pub usage: Usage,
}

/// `save(sessionId, snapshot)` — upserts the session row, incrementally
/// inserts any timeline entries not already present (fallback path), and
/// replaces the `com_state` session-snapshot blob.
#[instrument(skip(conn, snapshot))]
pub fn save(conn: &mut Connection, snapshot: &SessionSnapshotView) -> Result<()> {
    let tx = conn.transaction()?;
    let s = &snapshot.session;

    tx.execute(
        "INSERT INTO sessions
         (id, session_key, parent_id, fork_after_message_id, type, workspace_path,
          status, owner_entity_id, tick, schema_version, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            tick = MAX(sessions.tick, excluded.tick),
            updated_at = excluded.updated_at",
        params![
            s.id,
            s.key.to_string(),
            s.parent_id,
            s.fork_after_message_id,
            s.session_type.as_str(),
            s.workspace_path,
            s.status.as_str(),
            s.owner_entity_id,
            s.tick,
            s.schema_version,
            s.created_at,
            s.updated_at,
        ],
    )?;

    for message in &snapshot.timeline {
        let preview = message
            .text_preview
            .as_deref()
            .map(crate::types::truncate_preview);
        tx.execute(
            "INSERT OR IGNORE INTO messages
             (id, session_id, execution_id, entity_id, role, tick, sequence_in_tick,
              text_preview, visibility, tags, token_count, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                message.id,
                message.session_id,
                message.execution_id,
                message.entity_id,
                message.role.as_str(),
                message.tick,
                message.sequence_in_tick,
                preview,
                message.visibility.as_str(),
                serde_json::to_string(&message.tags)?,
                message.token_count as i64,
                serde_json::to_string(&message.metadata)?,
                message.created_at,
            ],
        )?;
        for block in &message.blocks {
            tx.execute(
                "INSERT OR IGNORE INTO content_blocks
                 (id, message_id, position, block_type, text_content, content_json, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    block.id,
                    block.message_id,
                    block.position,
                    block.block_type.as_str(),
                    block.text_content,
                    serde_json::to_string(&block.content_json)?,
                    serde_json::to_string(&block.metadata)?,
                ],
            )?;
        }
    }

    tx.execute(
        "INSERT INTO session_snapshots (session_id, key, value, updated_at)
         VALUES (?1, 'com_state', ?2, ?3)
         ON CONFLICT(session_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![s.id, snapshot.com_state.to_string(), s.updated_at],
    )?;

    tx.commit()?;
    Ok(())
}

/// `load(sessionId) -> snapshot | null` — loads the session row, all
/// messages ordered by `(tick, sequence_in_tick)`, all content blocks via a
/// correlated subquery (scales to >=500 messages), the `com_state` blob,
/// and a derived usage aggregate summed across the session's executions'
/// ticks.
#[instrument(skip(conn))]
pub fn load(conn: &Connection, session_id: &str) -> Result<Option<SessionSnapshotView>> {
    let session = match conn.query_row(
        "SELECT id, session_key, parent_id, fork_after_message_id, type, workspace_path,
                status, owner_entity_id, tick, schema_version, created_at, updated_at
         FROM sessions WHERE id = ?1",
        params![session_id],
        row_to_session,
    ) {
        Ok(s) => s,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut stmt = conn.prepare(
        "SELECT id, session_id, execution_id, entity_id, role, tick, sequence_in_tick,
                text_preview, visibility, tags, token_count, metadata, created_at
         FROM messages
         WHERE session_id = ?1
         ORDER BY tick, sequence_in_tick",
    )?;
    let mut timeline: Vec<Message> = stmt
        .query_map(params![session_id], row_to_message)?
        .filter_map(|r| r.ok())
        .collect();
    drop(stmt);

    // Single query for all blocks of this session's messages, grouped by
    // message id in application code — avoids N+1 queries at scale.
    let mut block_stmt = conn.prepare(
        "SELECT cb.id, cb.message_id, cb.position, cb.block_type, cb.text_content,
                cb.content_json, cb.metadata
         FROM content_blocks cb
         JOIN messages m ON m.id = cb.message_id
         WHERE m.session_id = ?1
         ORDER BY cb.message_id, cb.position",
    )?;
    let blocks: Vec<ContentBlock> = block_stmt
        .query_map(params![session_id], row_to_block)?
        .filter_map(|r| r.ok())
        .collect();
    drop(block_stmt);

    for message in &mut timeline {
        message.blocks = blocks
            .iter()
            .filter(|b| b.message_id == message.id)
            .cloned()
            .collect();
    }

    let com_state: String = conn
        .query_row(
            "SELECT value FROM session_snapshots WHERE session_id = ?1 AND key = 'com_state'",
            params![session_id],
            |row| row.get(0),
        )
        .unwrap_or_else(|_| "{}".to_string());
    let com_state: Value = serde_json::from_str(&com_state)?;

    let (input_tokens, output_tokens): (i64, i64) = conn.query_row(
        "SELECT
            COALESCE(SUM(json_extract(t.usage, '$.input_tokens')), 0),
            COALESCE(SUM(json_extract(t.usage, '$.output_tokens')), 0)
         FROM ticks t
         JOIN executions e ON e.id = t.execution_id
         WHERE e.session_id = ?1",
        params![session_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(Some(SessionSnapshotView {
        session,
        timeline,
        com_state,
        usage: Usage {
            input_tokens: input_tokens as u64,
            output_tokens: output_tokens as u64,
        },
    }))
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let key_str: String = row.get(1)?;
    let key = tentickle_core::types::SessionKey::parse(&key_str)
        .unwrap_or_else(|_| tentickle_core::types::SessionKey::unscoped(key_str));
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

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role_str: String = row.get(4)?;
    let visibility_str: String = row.get(8)?;
    let tags_str: String = row.get(9)?;
    let metadata_str: String = row.get(11)?;
    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        execution_id: row.get(2)?,
        entity_id: row.get(3)?,
        role: role_str.parse::<MessageRole>().unwrap_or(MessageRole::User),
        tick: row.get::<_, i64>(5)? as u32,
        sequence_in_tick: row.get::<_, i64>(6)? as u32,
        text_preview: row.get(7)?,
        visibility: visibility_str
            .parse::<Visibility>()
            .unwrap_or(Visibility::Model),
        tags: serde_json::from_str(&tags_str).unwrap_or_default(),
        token_count: row.get::<_, i64>(10)? as u64,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(Value::Null),
        created_at: row.get(12)?,
        blocks: Vec::new(),
    })
}

fn row_to_block(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentBlock> {
    let block_type_str: String = row.get(3)?;
    let content_json_str: String = row.get(5)?;
    let metadata_str: String = row.get(6)?;
    Ok(ContentBlock {
        id: row.get(0)?,
        message_id: row.get(1)?,
        position: row.get::<_, i64>(2)? as u32,
        block_type: block_type_str
            .parse::<BlockType>()
            .unwrap_or(BlockType::Text),
        text_content: row.get(4)?,
        content_json: serde_json::from_str(&content_json_str).unwrap_or(Value::Null),
        metadata: serde_json::from_str(&metadata_str).unwrap_or(Value::Null),
    })
}

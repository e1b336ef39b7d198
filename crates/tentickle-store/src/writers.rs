use rusqlite::{params, Connection};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::types::{truncate_preview, ExecutionTrigger, Message, Usage};

/// `createExecution` — called at `execution_start`. Fails fast on FK
/// violation (no session row).
#[instrument(skip(conn))]
pub fn create_execution(
    conn: &Connection,
    execution_id: &str,
    session_id: &str,
    trigger: ExecutionTrigger,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO executions (id, session_id, trigger_type, status, tick_count, started_at)
         VALUES (?1, ?2, ?3, 'running', 0, ?4)",
        params![execution_id, session_id, trigger.as_str(), now],
    )?;
    Ok(())
}

/// `recordTickStart` — called at `tick_start`. Idempotent on `(execId, tick)`.
#[instrument(skip(conn))]
pub fn record_tick_start(conn: &Connection, execution_id: &str, tick: u32) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO ticks (execution_id, tick_number, usage, started_at)
         VALUES (?1, ?2, '{}', ?3)",
        params![execution_id, tick, now],
    )?;
    Ok(())
}

/// `commitEntry` — called at `entry_committed`. Writes the message and all
/// its blocks in one transaction; idempotent on message id.
#[instrument(skip(conn, message), fields(message_id = %message.id))]
pub fn commit_entry(conn: &mut Connection, message: &Message) -> Result<()> {
    let tx = conn.transaction()?;

    let preview = message
        .text_preview
        .as_deref()
        .map(truncate_preview);

    let inserted = tx.execute(
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

    // Message already committed (idempotent retry) — blocks were written
    // alongside it the first time, so there's nothing left to do.
    if inserted == 0 {
        tx.commit()?;
        return Ok(());
    }

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

    tx.execute(
        "UPDATE sessions SET tick = MAX(tick, ?1), updated_at = ?2 WHERE id = ?3",
        params![message.tick, message.created_at, message.session_id],
    )?;

    tx.commit()?;
    Ok(())
}

/// `recordTickEnd` — called at `tick_end`.
#[instrument(skip(conn, usage))]
pub fn record_tick_end(
    conn: &Connection,
    execution_id: &str,
    tick: u32,
    model: &str,
    usage: &Usage,
    stop_reason: &str,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE ticks SET model = ?1, usage = ?2, stop_reason = ?3, completed_at = ?4
         WHERE execution_id = ?5 AND tick_number = ?6",
        params![
            model,
            serde_json::to_string(usage)?,
            stop_reason,
            now,
            execution_id,
            tick
        ],
    )?;
    if rows == 0 {
        return Err(StoreError::ExecutionNotFound {
            id: execution_id.to_string(),
        });
    }
    conn.execute(
        "UPDATE executions SET tick_count = ?1 WHERE id = ?2",
        params![tick + 1, execution_id],
    )?;
    Ok(())
}

/// `completeExecution` — called at `execution_end`.
#[instrument(skip(conn))]
pub fn complete_execution(
    conn: &Connection,
    execution_id: &str,
    status: crate::types::ExecutionStatus,
    tick_count: u32,
    error_message: Option<&str>,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE executions
         SET status = ?1, tick_count = ?2, error_message = ?3, completed_at = ?4
         WHERE id = ?5",
        params![status.as_str(), tick_count, error_message, now, execution_id],
    )?;
    if rows == 0 {
        return Err(StoreError::ExecutionNotFound {
            id: execution_id.to_string(),
        });
    }
    Ok(())
}

/// Mark every execution left `status='running'` with `completed_at IS NULL`
/// as crashed (spec §3 invariant, §8 property 2/S2). MUST NOT reopen them —
/// only transitions running → failed.
#[instrument(skip(conn))]
pub fn mark_crashed_executions(conn: &Connection) -> Result<usize> {
    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE executions
         SET status = 'failed', error_message = 'crashed: process exited mid-execution', completed_at = ?1
         WHERE status = 'running' AND completed_at IS NULL",
        params![now],
    )?;
    Ok(rows)
}

pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

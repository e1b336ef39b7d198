use std::sync::Once;

use rusqlite::Connection;

use crate::error::Result;

/// This package's name in `_schema_versions`.
pub const PACKAGE: &str = "memory";
const CURRENT_VERSION: i64 = 1;

const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("schema/001_memory_init.sql"))];

static VEC_EXTENSION_INIT: Once = Once::new();

/// Register `sqlite-vec` as an auto-extension. Must run before any
/// `Connection::open` in the process (spec §3/§6: vec0 virtual table).
pub fn register_vec_extension() {
    VEC_EXTENSION_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Run any migrations this package hasn't applied yet, tracked in
/// `_schema_versions(package, version)`.
pub fn ensure_schema(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _schema_versions (
            package TEXT PRIMARY KEY,
            version INTEGER NOT NULL
        );",
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT version FROM _schema_versions WHERE package = ?1",
            [PACKAGE],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_VERSION {
        return Ok(());
    }

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO _schema_versions (package, version) VALUES (?1, ?2)
             ON CONFLICT(package) DO UPDATE SET version = excluded.version",
            rusqlite::params![PACKAGE, version],
        )?;
        tx.commit()?;
    }

    Ok(())
}

/// Create the `vec0` virtual table for this connection if it doesn't exist
/// yet. `vec0` requires the embedding dimension as a literal at CREATE TABLE
/// time, so this can't live in a static migration file shared across configs.
/// Partitioned by `namespace` per spec §4.5.
pub fn ensure_vec_table(conn: &Connection, vector_dim: usize) -> Result<()> {
    let ddl = format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memories_vec USING vec0(
            memory_id TEXT PRIMARY KEY,
            namespace TEXT PARTITION KEY,
            embedding FLOAT[{vector_dim}] distance_metric=cosine
        );"
    );
    conn.execute_batch(&ddl)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_schema_is_idempotent() {
        register_vec_extension();
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_schema(&mut conn).unwrap();
        ensure_schema(&mut conn).unwrap();

        let version: i64 = conn
            .query_row(
                "SELECT version FROM _schema_versions WHERE package = ?1",
                [PACKAGE],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn vec_table_accepts_matching_dimension() {
        register_vec_extension();
        let conn = Connection::open_in_memory().unwrap();
        ensure_vec_table(&conn, 8).unwrap();
        conn.execute(
            "INSERT INTO memories_vec (memory_id, namespace, embedding) VALUES (?1, ?2, vec_f32(?3))",
            rusqlite::params![
                "m1",
                "default",
                serde_json::to_string(&[0.1f32; 8]).unwrap()
            ],
        )
        .unwrap();
    }
}

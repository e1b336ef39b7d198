use rusqlite::Connection;

use crate::error::Result;

/// This package's name in `_schema_versions`.
pub const PACKAGE: &str = "store";
const CURRENT_VERSION: i64 = 1;

const MIGRATIONS: &[(i64, &str)] =
    &[(1, include_str!("schema/001_store_init.sql"))];

/// Open the connection pragmas every process MUST set (spec §4.3):
/// WAL journal mode and foreign key enforcement.
pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Run any migrations this package hasn't applied yet, tracked in
/// `_schema_versions(package, version)`. A failed migration rolls back and
/// leaves the recorded version unchanged.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_schema_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_pragmas(&conn).unwrap();
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
    fn foreign_keys_are_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        apply_pragmas(&conn).unwrap();
        let mut conn = conn;
        ensure_schema(&mut conn).unwrap();

        let err = conn
            .execute(
                "INSERT INTO messages (id, session_id, role, tick, sequence_in_tick, created_at)
                 VALUES ('m1', 'does-not-exist', 'user', 0, 0, '2026-01-01T00:00:00Z')",
                [],
            )
            .unwrap_err();
        assert!(matches!(err, rusqlite::Error::SqliteFailure(_, _)));
    }
}

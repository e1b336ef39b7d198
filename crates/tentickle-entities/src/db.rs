use rusqlite::Connection;

use crate::error::Result;

/// This package's name in `_schema_versions` (spec §4.3 migrations).
pub const PACKAGE: &str = "entities";
const CURRENT_VERSION: i64 = 1;

const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("schema/001_entities_init.sql"))];

/// Run any migrations this package hasn't applied yet. A failed migration
/// rolls back and leaves the recorded version unchanged (spec §4.3).
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
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
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
}

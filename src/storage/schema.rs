//! Database schema definitions and migration logic for the indexed backend.
//!
//! The store records its schema version in `metadata.schema_version`.
//! On open, a linear sequence of migrations is applied until
//! [`CURRENT_SCHEMA_VERSION`] is reached; each step runs inside its own
//! transaction so a crash mid-migration leaves the recorded version at
//! the last completed step. A store whose version is ahead of this build
//! refuses to open.

use crate::error::{BeadsError, Result};
use crate::storage::meta_keys;
use rusqlite::{Connection, OptionalExtension};

pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Schema as of version 1.
const SCHEMA_V1: &str = r"
    CREATE TABLE IF NOT EXISTS issues (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT,
        design TEXT,
        acceptance_criteria TEXT,
        notes TEXT,
        status TEXT NOT NULL,
        priority INTEGER NOT NULL,
        issue_type TEXT NOT NULL,
        assignee TEXT,
        external_ref TEXT,
        estimated_minutes INTEGER,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        closed_at TEXT,
        CHECK (length(title) >= 1 AND length(title) <= 500),
        CHECK (priority >= 0 AND priority <= 4)
    );

    CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status);
    CREATE INDEX IF NOT EXISTS idx_issues_priority ON issues(priority);
    CREATE INDEX IF NOT EXISTS idx_issues_issue_type ON issues(issue_type);
    CREATE INDEX IF NOT EXISTS idx_issues_assignee ON issues(assignee);
    CREATE INDEX IF NOT EXISTS idx_issues_created_at ON issues(created_at);

    CREATE TABLE IF NOT EXISTS dependencies (
        issue_id TEXT NOT NULL,
        depends_on_id TEXT NOT NULL,
        type TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (issue_id, depends_on_id)
    );
    CREATE INDEX IF NOT EXISTS idx_dependencies_issue_id ON dependencies(issue_id);
    CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on_id ON dependencies(depends_on_id);

    CREATE TABLE IF NOT EXISTS labels (
        issue_id TEXT NOT NULL,
        label TEXT NOT NULL,
        PRIMARY KEY (issue_id, label),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_labels_label ON labels(label);

    CREATE TABLE IF NOT EXISTS comments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id TEXT NOT NULL,
        author TEXT NOT NULL,
        text TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_comments_issue_id ON comments(issue_id);

    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        actor TEXT NOT NULL,
        payload TEXT,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_events_issue_id ON events(issue_id);
    CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at);

    CREATE TABLE IF NOT EXISTS config (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS counters (
        prefix TEXT PRIMARY KEY,
        last_id INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS dirty_issues (
        issue_id TEXT PRIMARY KEY,
        marked_at TEXT NOT NULL
    );
";

/// Migration 1 -> 2: record a close reason alongside closed_at.
const MIGRATE_V1_TO_V2: &str = "ALTER TABLE issues ADD COLUMN close_reason TEXT";

/// Apply the schema to a fresh or existing database and bring it to the
/// current version.
///
/// # Errors
///
/// Returns `SchemaMismatch` when the store was written by a newer build,
/// or a database error if DDL fails.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    let found = read_schema_version(conn)?;

    match found {
        None => {
            // Fresh database: create everything at the current version.
            conn.execute_batch(SCHEMA_V1)?;
            conn.execute_batch(MIGRATE_V1_TO_V2)?;
            write_schema_version(conn, CURRENT_SCHEMA_VERSION)?;
        }
        Some(v) if v > CURRENT_SCHEMA_VERSION => {
            return Err(BeadsError::SchemaMismatch {
                found: v,
                supported: CURRENT_SCHEMA_VERSION,
            });
        }
        Some(v) => {
            run_migrations(conn, v)?;
        }
    }

    Ok(())
}

fn read_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='metadata'")
        .and_then(|mut stmt| stmt.exists([]))?;
    if !table_exists {
        return Ok(None);
    }

    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?",
            [meta_keys::SCHEMA_VERSION],
            |row| row.get(0),
        )
        .optional()?;

    match version {
        None => Ok(None),
        Some(raw) => raw.parse::<i32>().map(Some).map_err(|_| {
            BeadsError::Corruption {
                path: conn.path().unwrap_or("<memory>").into(),
                reason: format!("unparseable schema_version: {raw}"),
            }
        }),
    }
}

fn write_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
        rusqlite::params![meta_keys::SCHEMA_VERSION, version.to_string()],
    )?;
    Ok(())
}

/// Run migrations from `from` (exclusive) to the current version. Each
/// step commits its version bump atomically with its DDL.
fn run_migrations(conn: &Connection, from: i32) -> Result<()> {
    let mut version = from;
    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        conn.execute_batch("BEGIN")?;
        let applied = apply_migration_step(conn, next);
        match applied {
            Ok(()) => {
                write_schema_version(conn, next)?;
                conn.execute_batch("COMMIT")?;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e);
            }
        }
        version = next;
    }
    Ok(())
}

fn apply_migration_step(conn: &Connection, to: i32) -> Result<()> {
    match to {
        2 => {
            // Idempotent: skip when the column already exists.
            let has_close_reason: bool = conn
                .prepare("SELECT 1 FROM pragma_table_info('issues') WHERE name='close_reason'")
                .and_then(|mut stmt| stmt.exists([]))?;
            if !has_close_reason {
                conn.execute_batch(MIGRATE_V1_TO_V2)?;
            }
            Ok(())
        }
        other => Err(BeadsError::SchemaMismatch {
            found: other,
            supported: CURRENT_SCHEMA_VERSION,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_apply_schema_fresh() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).expect("apply schema");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for t in [
            "issues",
            "dependencies",
            "labels",
            "comments",
            "events",
            "config",
            "metadata",
            "counters",
            "dirty_issues",
        ] {
            assert!(tables.contains(&t.to_string()), "missing table {t}");
        }

        assert_eq!(
            read_schema_version(&conn).unwrap(),
            Some(CURRENT_SCHEMA_VERSION)
        );
    }

    #[test]
    fn test_apply_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();
    }

    #[test]
    fn test_migration_from_v1() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_V1).unwrap();
        conn.execute(
            "INSERT INTO metadata (key, value) VALUES ('schema_version', '1')",
            [],
        )
        .unwrap();

        apply_schema(&conn).unwrap();
        assert_eq!(
            read_schema_version(&conn).unwrap(),
            Some(CURRENT_SCHEMA_VERSION)
        );

        let has_close_reason: bool = conn
            .prepare("SELECT 1 FROM pragma_table_info('issues') WHERE name='close_reason'")
            .and_then(|mut stmt| stmt.exists([]))
            .unwrap();
        assert!(has_close_reason);
    }

    #[test]
    fn test_future_version_refused() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        conn.execute(
            "UPDATE metadata SET value = '99' WHERE key = 'schema_version'",
            [],
        )
        .unwrap();

        let err = apply_schema(&conn).unwrap_err();
        assert!(matches!(err, BeadsError::SchemaMismatch { found: 99, .. }));
    }
}

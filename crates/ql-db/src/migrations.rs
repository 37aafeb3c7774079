//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order.  A
//! `schema_migrations` table tracks which versions have been applied.

use rusqlite::Connection;
use ql_core::{Error, Result};

/// V1: initial schema.
const V1_INITIAL: &str = r#"
-- Users and auth
CREATE TABLE users (
    id            TEXT PRIMARY KEY,
    username      TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL,
    roles         TEXT NOT NULL DEFAULT '[]',
    created_at    TEXT NOT NULL
);

CREATE TABLE auth_tokens (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token      TEXT UNIQUE NOT NULL,
    expires_at TEXT NOT NULL
);

-- Subjects of every content type
CREATE TABLE subjects (
    id           TEXT PRIMARY KEY,
    content_type TEXT NOT NULL,
    parent_id    TEXT REFERENCES subjects(id),
    owner_id     TEXT,
    state        TEXT NOT NULL,
    data         TEXT NOT NULL DEFAULT '{}',
    rank         INTEGER NOT NULL DEFAULT 0,
    draft_of     TEXT REFERENCES subjects(id),
    revision     INTEGER NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    deleted_at   TEXT
);
CREATE INDEX idx_subjects_type ON subjects(content_type);
CREATE INDEX idx_subjects_parent ON subjects(parent_id, rank);
CREATE INDEX idx_subjects_draft ON subjects(draft_of);

-- Audit trail of saves and deletes
CREATE TABLE subject_changes (
    id         TEXT PRIMARY KEY,
    subject_id TEXT NOT NULL REFERENCES subjects(id),
    user_id    TEXT,
    action     TEXT NOT NULL,
    comment    TEXT NOT NULL,
    revision   INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX idx_subject_changes_subject ON subject_changes(subject_id);
"#;

/// Ordered list of (version, sql) pairs.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL)];

/// Run all pending migrations on `conn`.
///
/// Creates the `schema_migrations` tracking table if it does not exist,
/// then applies each outstanding migration inside a transaction.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::persistence(format!("failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(Error::persistence)?;

        if already {
            continue;
        }

        let tx = conn.unchecked_transaction().map_err(Error::persistence)?;

        tx.execute_batch(sql)
            .map_err(|e| Error::persistence(format!("migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(Error::persistence)?;

        tx.commit().map_err(Error::persistence)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
    }

    #[test]
    fn all_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for t in [
            "users",
            "auth_tokens",
            "subjects",
            "subject_changes",
            "schema_migrations",
        ] {
            let exists: bool = conn
                .query_row(
                    "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
                    [t],
                    |row| row.get(0),
                )
                .unwrap();
            assert!(exists, "table {t} should exist");
        }
    }
}

//! Subject change log.

use chrono::Utc;
use ql_core::{ChangeId, Error, Result, SubjectId, UserId};
use rusqlite::Connection;

use crate::models::Change;

const COLS: &str = "id, subject_id, user_id, action, comment, revision, created_at";

/// Append an entry to a subject's audit trail.
pub fn record_change(
    conn: &Connection,
    subject_id: SubjectId,
    user_id: Option<UserId>,
    action: &str,
    comment: &str,
    revision: u64,
) -> Result<ChangeId> {
    let id = ChangeId::new();
    conn.execute(
        "INSERT INTO subject_changes (id, subject_id, user_id, action, comment, revision, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            id.to_string(),
            subject_id.to_string(),
            user_id.map(|u| u.to_string()),
            action,
            comment,
            revision as i64,
            Utc::now().to_rfc3339(),
        ],
    )
    .map_err(Error::persistence)?;
    Ok(id)
}

/// List a subject's changes, oldest first.
pub fn list_changes(conn: &Connection, subject_id: SubjectId) -> Result<Vec<Change>> {
    let q = format!(
        "SELECT {COLS} FROM subject_changes WHERE subject_id = ?1 ORDER BY created_at, revision"
    );
    let mut stmt = conn.prepare(&q).map_err(Error::persistence)?;
    let rows = stmt
        .query_map([subject_id.to_string()], Change::from_row)
        .map_err(Error::persistence)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::persistence)?;
    Ok(rows)
}

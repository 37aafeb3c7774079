//! Subject persistence.
//!
//! Saves are optimistic: an update only applies when the stored revision
//! still equals the one the caller loaded, otherwise the write is rejected
//! with [`Error::Conflict`]. Deletes are soft and idempotent.

use chrono::Utc;
use ql_core::{Error, Result, Subject, SubjectId, UserId};
use rusqlite::{Connection, OptionalExtension};

use crate::models::{subject_from_row, SUBJECT_COLS};
use crate::queries::changes;

/// Criteria for listing subjects. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct SubjectFilter {
    pub content_type: Option<String>,
    pub parent_id: Option<SubjectId>,
    pub draft_of: Option<SubjectId>,
    pub owner_id: Option<UserId>,
    pub state: Option<String>,
    /// Skip drafts (rows with `draft_of` set).
    pub live_only: bool,
    pub limit: Option<usize>,
}

/// Get a live (not deleted) subject by id.
pub fn get_subject(conn: &Connection, id: SubjectId) -> Result<Option<Subject>> {
    let q = format!("SELECT {SUBJECT_COLS} FROM subjects WHERE id = ?1 AND deleted_at IS NULL");
    conn.query_row(&q, [id.to_string()], subject_from_row)
        .optional()
        .map_err(Error::persistence)
}

/// List live subjects matching `filter`, ordered by rank then age.
pub fn list_subjects(conn: &Connection, filter: &SubjectFilter) -> Result<Vec<Subject>> {
    let mut clauses = vec!["deleted_at IS NULL".to_string()];
    let mut params: Vec<String> = Vec::new();

    let mut push = |column: &str, value: String| {
        params.push(value);
        clauses.push(format!("{column} = ?{}", params.len()));
    };
    if let Some(ct) = &filter.content_type {
        push("content_type", ct.clone());
    }
    if let Some(parent) = filter.parent_id {
        push("parent_id", parent.to_string());
    }
    if let Some(draft_of) = filter.draft_of {
        push("draft_of", draft_of.to_string());
    }
    if let Some(owner) = filter.owner_id {
        push("owner_id", owner.to_string());
    }
    if let Some(state) = &filter.state {
        push("state", state.clone());
    }
    if filter.live_only {
        clauses.push("draft_of IS NULL".to_string());
    }

    let mut q = format!(
        "SELECT {SUBJECT_COLS} FROM subjects WHERE {} ORDER BY rank, created_at",
        clauses.join(" AND ")
    );
    if let Some(limit) = filter.limit {
        q.push_str(&format!(" LIMIT {limit}"));
    }

    let mut stmt = conn.prepare(&q).map_err(Error::persistence)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), subject_from_row)
        .map_err(Error::persistence)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::persistence)?;
    Ok(rows)
}

/// Insert or update `subject` and log the change, in one transaction.
///
/// Returns the stored subject with its new revision and timestamps.
pub fn save_subject(
    conn: &Connection,
    subject: &Subject,
    user_id: Option<UserId>,
    comment: &str,
) -> Result<Subject> {
    let now = Utc::now();
    let stamp = now.to_rfc3339();
    let data = serde_json::to_string(&subject.data).map_err(|e| Error::Internal(e.to_string()))?;
    let id = subject.id.to_string();
    let parent_id = subject.parent_id.map(|p| p.to_string());
    let owner_id = subject.owner_id.map(|o| o.to_string());
    let draft_of = subject.draft_of.map(|d| d.to_string());
    let revision = subject.revision + 1;

    let tx = conn.unchecked_transaction().map_err(Error::persistence)?;

    if subject.is_new() {
        tx.execute(
            "INSERT INTO subjects (id, content_type, parent_id, owner_id, state, data, rank,
                                   draft_of, revision, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?9)",
            rusqlite::params![
                id,
                subject.content_type,
                parent_id,
                owner_id,
                subject.state,
                data,
                subject.rank,
                draft_of,
                stamp,
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint failed") {
                Error::Conflict(format!("subject {id} already exists"))
            } else {
                Error::persistence(e)
            }
        })?;
    } else {
        let n = tx
            .execute(
                "UPDATE subjects
                 SET parent_id = ?2, owner_id = ?3, state = ?4, data = ?5, rank = ?6,
                     draft_of = ?7, revision = ?8, updated_at = ?9
                 WHERE id = ?1 AND revision = ?10 AND deleted_at IS NULL",
                rusqlite::params![
                    id,
                    parent_id,
                    owner_id,
                    subject.state,
                    data,
                    subject.rank,
                    draft_of,
                    revision as i64,
                    stamp,
                    subject.revision as i64,
                ],
            )
            .map_err(Error::persistence)?;
        if n == 0 {
            return Err(match get_subject(&tx, subject.id)? {
                Some(current) => Error::Conflict(format!(
                    "subject {id} is at revision {}, not {}",
                    current.revision, subject.revision
                )),
                None => Error::not_found("subject", &id),
            });
        }
    }

    changes::record_change(&tx, subject.id, user_id, "save", comment, revision)?;
    tx.commit().map_err(Error::persistence)?;

    let mut stored = subject.clone();
    stored.revision = revision;
    stored.created_at = subject.created_at.or(Some(now));
    stored.updated_at = Some(now);
    Ok(stored)
}

/// Soft-delete a subject. Returns `false` if it was already gone.
pub fn delete_subject(
    conn: &Connection,
    id: SubjectId,
    user_id: Option<UserId>,
    comment: &str,
) -> Result<bool> {
    let tx = conn.unchecked_transaction().map_err(Error::persistence)?;
    let Some(current) = get_subject(&tx, id)? else {
        return Ok(false);
    };

    tx.execute(
        "UPDATE subjects SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
        rusqlite::params![id.to_string(), Utc::now().to_rfc3339()],
    )
    .map_err(Error::persistence)?;
    changes::record_change(&tx, id, user_id, "delete", comment, current.revision)?;
    tx.commit().map_err(Error::persistence)?;
    Ok(true)
}

/// Assign `rank` 0..n to the children of `parent_id` in the given order.
///
/// Ids that are not live children of `parent_id` are skipped. Returns the
/// number of children re-ranked.
pub fn set_ranks(conn: &Connection, parent_id: SubjectId, ordered: &[SubjectId]) -> Result<usize> {
    let tx = conn.unchecked_transaction().map_err(Error::persistence)?;
    let mut updated = 0;
    for (rank, id) in ordered.iter().enumerate() {
        updated += tx
            .execute(
                "UPDATE subjects SET rank = ?3
                 WHERE id = ?1 AND parent_id = ?2 AND deleted_at IS NULL",
                rusqlite::params![id.to_string(), parent_id.to_string(), rank as i64],
            )
            .map_err(Error::persistence)?;
    }
    tx.commit().map_err(Error::persistence)?;
    Ok(updated)
}

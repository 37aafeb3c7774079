//! Rust structs mapping to database tables.
//!
//! Each model implements `from_row` for constructing itself from a
//! `rusqlite::Row`. Subjects are a `ql-core` type and are read with
//! [`subject_from_row`].

use chrono::{DateTime, Utc};
use ql_core::{ChangeId, SessionId, Subject, SubjectId, UserId};
use rusqlite::types::Type;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Parse a UUID-based ID from a text column.
fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e))?;
    Ok(T::from(uuid))
}

fn parse_opt_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|v| {
        Uuid::parse_str(&v)
            .map(T::from)
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn parse_time(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_json<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conversion_error(idx, e))
}

// ---------------------------------------------------------------------------
// Subject
// ---------------------------------------------------------------------------

/// Column list matching [`subject_from_row`].
pub const SUBJECT_COLS: &str = "id, content_type, parent_id, owner_id, state, data, rank, \
                                draft_of, revision, created_at, updated_at";

/// Build a [`Subject`] from a row selected with [`SUBJECT_COLS`].
pub fn subject_from_row(row: &rusqlite::Row) -> rusqlite::Result<Subject> {
    let revision: i64 = row.get(8)?;
    Ok(Subject {
        id: parse_id(row, 0)?,
        content_type: row.get(1)?,
        parent_id: parse_opt_id(row, 2)?,
        owner_id: parse_opt_id(row, 3)?,
        state: row.get(4)?,
        data: parse_json(row, 5)?,
        rank: row.get(6)?,
        draft_of: parse_opt_id(row, 7)?,
        revision: revision.max(0) as u64,
        created_at: Some(parse_time(row, 9)?),
        updated_at: Some(parse_time(row, 10)?),
    })
}

// ---------------------------------------------------------------------------
// Change
// ---------------------------------------------------------------------------

/// One entry of a subject's audit trail.
#[derive(Debug, Clone)]
pub struct Change {
    pub id: ChangeId,
    pub subject_id: SubjectId,
    pub user_id: Option<UserId>,
    /// `save` or `delete`.
    pub action: String,
    pub comment: String,
    pub revision: u64,
    pub created_at: String,
}

impl Change {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let revision: i64 = row.get(5)?;
        Ok(Self {
            id: parse_id(row, 0)?,
            subject_id: parse_id(row, 1)?,
            user_id: parse_opt_id(row, 2)?,
            action: row.get(3)?,
            comment: row.get(4)?,
            revision: revision.max(0) as u64,
            created_at: row.get(6)?,
        })
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    pub roles: Vec<String>,
    pub created_at: String,
}

impl User {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            username: row.get(1)?,
            password_hash: row.get(2)?,
            roles: parse_json(row, 3)?,
            created_at: row.get(4)?,
        })
    }
}

// ---------------------------------------------------------------------------
// AuthToken
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AuthToken {
    pub id: SessionId,
    pub user_id: UserId,
    pub token: String,
    pub expires_at: String,
}

impl AuthToken {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            user_id: parse_id(row, 1)?,
            token: row.get(2)?,
            expires_at: row.get(3)?,
        })
    }
}

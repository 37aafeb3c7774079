//! In-process [`SubjectStore`].
//!
//! Keeps every subject in a mutex-guarded vector with the same revision
//! and soft-delete rules as the SQLite store. Used by tests and benchmarks.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use ql_core::{Error, Result, Subject, SubjectId, UserId};

use crate::subject::{Criteria, SubjectStore};

/// One entry of the change log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub subject_id: SubjectId,
    pub action: &'static str,
    pub comment: String,
    pub user_id: Option<UserId>,
    pub revision: u64,
}

struct Row {
    subject: Subject,
    deleted: bool,
}

#[derive(Default)]
struct Inner {
    rows: Vec<Row>,
    changes: Vec<ChangeRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a subject as if it had been saved once.
    pub fn insert(&self, mut subject: Subject) -> Subject {
        if subject.revision == 0 {
            subject.revision = 1;
        }
        let now = Utc::now();
        subject.created_at.get_or_insert(now);
        subject.updated_at.get_or_insert(now);
        self.inner.lock().rows.push(Row {
            subject: subject.clone(),
            deleted: false,
        });
        subject
    }

    /// The stored copy of `id`, including deleted subjects.
    pub fn get(&self, id: SubjectId) -> Option<Subject> {
        self.inner
            .lock()
            .rows
            .iter()
            .find(|r| r.subject.id == id)
            .map(|r| r.subject.clone())
    }

    pub fn is_deleted(&self, id: SubjectId) -> bool {
        self.inner
            .lock()
            .rows
            .iter()
            .any(|r| r.subject.id == id && r.deleted)
    }

    /// Number of live subjects.
    pub fn len(&self) -> usize {
        self.inner.lock().rows.iter().filter(|r| !r.deleted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The change log, oldest first.
    pub fn changes(&self) -> Vec<ChangeRecord> {
        self.inner.lock().changes.clone()
    }
}

#[async_trait]
impl SubjectStore for MemoryStore {
    async fn find(&self, criteria: &Criteria) -> Result<Vec<Subject>> {
        let inner = self.inner.lock();
        let mut found: Vec<Subject> = inner
            .rows
            .iter()
            .filter(|r| !r.deleted && criteria.matches(&r.subject))
            .map(|r| r.subject.clone())
            .collect();
        // Rows are kept in insertion order, so a stable sort on rank keeps
        // creation order among equals.
        found.sort_by_key(|s| s.rank);
        if let Some(limit) = criteria.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn save(&self, subject: &Subject, comment: &str, by: Option<UserId>) -> Result<Subject> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let mut saved = subject.clone();

        if subject.is_new() {
            if inner.rows.iter().any(|r| r.subject.id == subject.id) {
                return Err(Error::Conflict(format!("subject {} already exists", subject.id)));
            }
            saved.revision = 1;
            saved.created_at = Some(now);
            saved.updated_at = Some(now);
            inner.rows.push(Row {
                subject: saved.clone(),
                deleted: false,
            });
        } else {
            let row = inner
                .rows
                .iter_mut()
                .find(|r| r.subject.id == subject.id && !r.deleted)
                .ok_or_else(|| Error::not_found("subject", subject.id))?;
            if row.subject.revision != subject.revision {
                return Err(Error::Conflict(format!(
                    "subject {} is at revision {}, not {}",
                    subject.id, row.subject.revision, subject.revision
                )));
            }
            saved.revision = subject.revision + 1;
            saved.created_at = row.subject.created_at;
            saved.updated_at = Some(now);
            row.subject = saved.clone();
        }

        inner.changes.push(ChangeRecord {
            subject_id: saved.id,
            action: if saved.revision == 1 { "create" } else { "update" },
            comment: comment.to_string(),
            user_id: by,
            revision: saved.revision,
        });
        Ok(saved)
    }

    async fn delete(&self, subject: &Subject, comment: &str, by: Option<UserId>) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(row) = inner
            .rows
            .iter_mut()
            .find(|r| r.subject.id == subject.id && !r.deleted)
        else {
            return Ok(false);
        };
        row.deleted = true;
        let revision = row.subject.revision;
        inner.changes.push(ChangeRecord {
            subject_id: subject.id,
            action: "delete",
            comment: comment.to_string(),
            user_id: by,
            revision,
        });
        Ok(true)
    }

    async fn reorder(&self, parent: SubjectId, order: &[SubjectId]) -> Result<()> {
        let mut inner = self.inner.lock();
        for (rank, id) in order.iter().enumerate() {
            if let Some(row) = inner
                .rows
                .iter_mut()
                .find(|r| r.subject.id == *id && r.subject.parent_id == Some(parent) && !r.deleted)
            {
                row.subject.rank = rank as i64;
            }
        }
        Ok(())
    }
}

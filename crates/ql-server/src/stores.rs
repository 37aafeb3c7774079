//! SQLite-backed collaborators for the pipeline engine.
//!
//! [`SqliteStore`] implements [`SubjectStore`] and [`SqliteUsers`] implements
//! [`UserDirectory`] over the r2d2 pool. rusqlite is synchronous, so every
//! call runs on the blocking thread pool.

use async_trait::async_trait;
use ql_core::{Error, Result, Subject, SubjectId, UserId};
use ql_db::pool::{get_conn, DbPool};
use ql_db::queries::subjects::{self, SubjectFilter};
use ql_db::queries::users;
use ql_pipeline::{Criteria, CurrentUser, SubjectStore, UserDirectory};
use rusqlite::Connection;

/// Run `f` against a pooled connection on the blocking thread pool.
async fn blocking<T, F>(db: &DbPool, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = get_conn(&db)?;
        f(&conn)
    })
    .await
    .map_err(|e| Error::Internal(format!("storage task failed: {e}")))?
}

/// Subject storage in the `subjects` table.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

fn filter_for(criteria: &Criteria) -> SubjectFilter {
    SubjectFilter {
        content_type: criteria.content_type.clone(),
        parent_id: criteria.parent_id,
        draft_of: criteria.draft_of,
        owner_id: None,
        state: criteria.state.clone(),
        live_only: criteria.live_only,
        limit: criteria.limit,
    }
}

#[async_trait]
impl SubjectStore for SqliteStore {
    async fn find(&self, criteria: &Criteria) -> Result<Vec<Subject>> {
        let criteria = criteria.clone();
        blocking(&self.db, move |conn| match criteria.id {
            Some(id) => Ok(subjects::get_subject(conn, id)?
                .filter(|s| criteria.matches(s))
                .into_iter()
                .collect()),
            None => subjects::list_subjects(conn, &filter_for(&criteria)),
        })
        .await
    }

    async fn save(&self, subject: &Subject, comment: &str, by: Option<UserId>) -> Result<Subject> {
        let subject = subject.clone();
        let comment = comment.to_string();
        blocking(&self.db, move |conn| {
            subjects::save_subject(conn, &subject, by, &comment)
        })
        .await
    }

    async fn delete(&self, subject: &Subject, comment: &str, by: Option<UserId>) -> Result<bool> {
        let id = subject.id;
        let comment = comment.to_string();
        blocking(&self.db, move |conn| {
            subjects::delete_subject(conn, id, by, &comment)
        })
        .await
    }

    async fn reorder(&self, parent: SubjectId, order: &[SubjectId]) -> Result<()> {
        let order = order.to_vec();
        let updated = blocking(&self.db, move |conn| subjects::set_ranks(conn, parent, &order)).await?;
        tracing::debug!(parent = %parent, updated, "Children reordered");
        Ok(())
    }
}

/// Resolves callers from the `users` table.
#[derive(Clone)]
pub struct SqliteUsers {
    db: DbPool,
}

impl SqliteUsers {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for SqliteUsers {
    async fn find_user(&self, id: UserId) -> Result<Option<CurrentUser>> {
        let user = blocking(&self.db, move |conn| users::get_user_by_id(conn, id)).await?;
        Ok(user.map(|u| CurrentUser {
            id: u.id,
            username: u.username,
            roles: u.roles,
        }))
    }
}

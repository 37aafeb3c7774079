//! The persisted domain object a pipeline operates on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{SubjectId, UserId};

/// State given to freshly constructed subjects.
pub const INITIAL_STATE: &str = "draft";

/// A post, stream, group, profile or any other content item.
///
/// `revision` is 0 until the first successful save; storage bumps it on
/// every write and rejects saves carrying a stale value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub content_type: String,
    pub parent_id: Option<SubjectId>,
    pub owner_id: Option<UserId>,
    pub state: String,
    pub data: Value,
    pub rank: i64,
    /// The published subject this one is a pending draft of.
    pub draft_of: Option<SubjectId>,
    pub revision: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Subject {
    /// An unsaved subject of `content_type` with an empty data document.
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            id: SubjectId::new(),
            content_type: content_type.into(),
            parent_id: None,
            owner_id: None,
            state: INITIAL_STATE.into(),
            data: Value::Object(Default::default()),
            rank: 0,
            draft_of: None,
            revision: 0,
            created_at: None,
            updated_at: None,
        }
    }

    /// Whether this subject has never been persisted.
    pub fn is_new(&self) -> bool {
        self.revision == 0
    }

    /// Whether `user` owns this subject.
    pub fn is_owned_by(&self, user: Option<UserId>) -> bool {
        user.is_some() && self.owner_id == user
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_subject_is_unsaved_draft() {
        let s = Subject::new("post");
        assert!(s.is_new());
        assert_eq!(s.state, INITIAL_STATE);
        assert!(s.data.as_object().is_some_and(|m| m.is_empty()));
    }

    #[test]
    fn ownership_requires_a_user() {
        let mut s = Subject::new("post");
        assert!(!s.is_owned_by(None));
        let user = UserId::new();
        s.owner_id = Some(user);
        assert!(s.is_owned_by(Some(user)));
        assert!(!s.is_owned_by(Some(UserId::new())));
    }
}

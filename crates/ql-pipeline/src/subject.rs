//! The persistence boundary of the engine.
//!
//! Storage backends implement the type-agnostic [`SubjectStore`]. The engine
//! wraps it in one [`SubjectService`] per content type ([`StoredService`]),
//! which exposes exactly the relationship capabilities that content type
//! declares in the catalog: a type with `children` hands out a
//! [`ChildLookup`], one with `parent` a [`ParentLookup`], one with `drafts` a
//! [`DraftStore`]. Steps ask for a capability instead of assuming one.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ql_core::{Error, Result, Subject, SubjectId, UserId};

use crate::catalog::ContentType;

/// A relationship capability a step may require of its content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ParentLookup,
    ChildLookup,
    DraftStore,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::ParentLookup => f.write_str("parent lookup"),
            Capability::ChildLookup => f.write_str("child lookup"),
            Capability::DraftStore => f.write_str("draft store"),
        }
    }
}

/// Criteria for loading subjects. Unset fields do not filter; deleted
/// subjects never match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    pub id: Option<SubjectId>,
    pub content_type: Option<String>,
    pub parent_id: Option<SubjectId>,
    pub draft_of: Option<SubjectId>,
    pub state: Option<String>,
    /// Excludes drafts (subjects with `draft_of` set).
    pub live_only: bool,
    pub limit: Option<usize>,
}

impl Criteria {
    pub fn id(id: SubjectId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// The live subject `id`; drafts do not match.
    pub fn live(id: SubjectId) -> Self {
        Self {
            id: Some(id),
            live_only: true,
            ..Self::default()
        }
    }

    /// Live children of `parent`.
    pub fn children_of(parent: SubjectId) -> Self {
        Self {
            parent_id: Some(parent),
            live_only: true,
            ..Self::default()
        }
    }

    pub fn draft_of(live: SubjectId) -> Self {
        Self {
            draft_of: Some(live),
            ..Self::default()
        }
    }

    /// Whether `subject` satisfies every set field.
    pub fn matches(&self, subject: &Subject) -> bool {
        self.id.map_or(true, |id| subject.id == id)
            && self
                .content_type
                .as_ref()
                .map_or(true, |ct| &subject.content_type == ct)
            && self.parent_id.map_or(true, |p| subject.parent_id == Some(p))
            && self.draft_of.map_or(true, |d| subject.draft_of == Some(d))
            && self.state.as_ref().map_or(true, |s| &subject.state == s)
            && !(self.live_only && subject.draft_of.is_some())
    }
}

/// Type-agnostic subject storage.
#[async_trait]
pub trait SubjectStore: Send + Sync {
    /// Live subjects matching `criteria`, ordered by rank then age.
    async fn find(&self, criteria: &Criteria) -> Result<Vec<Subject>>;

    /// Persist `subject`, returning the stored copy with its new revision.
    ///
    /// Rejects stale revisions with [`Error::Conflict`].
    async fn save(&self, subject: &Subject, comment: &str, by: Option<UserId>) -> Result<Subject>;

    /// Soft-delete `subject`. Returns `false` if it was already gone.
    async fn delete(&self, subject: &Subject, comment: &str, by: Option<UserId>) -> Result<bool>;

    /// Rank the children of `parent` in the given order.
    async fn reorder(&self, parent: SubjectId, order: &[SubjectId]) -> Result<()>;
}

/// The persistence collaborator for one content type.
#[async_trait]
pub trait SubjectService: Send + Sync {
    fn content_type(&self) -> &str;

    /// A fresh, unsaved subject.
    fn new_subject(&self) -> Subject;

    /// The first subject matching `criteria`, or [`Error::NotFound`].
    async fn load(&self, criteria: Criteria) -> Result<Subject>;

    async fn list(&self, criteria: Criteria) -> Result<Vec<Subject>>;

    /// Persist `subject` in place (its revision and timestamps are updated).
    async fn save(&self, subject: &mut Subject, comment: &str, by: Option<UserId>) -> Result<()>;

    /// Delete `subject`. Deleting something already deleted succeeds.
    async fn delete(&self, subject: &Subject, comment: &str, by: Option<UserId>) -> Result<()>;

    fn as_parent_lookup(&self) -> Option<&dyn ParentLookup> {
        None
    }

    fn as_child_lookup(&self) -> Option<&dyn ChildLookup> {
        None
    }

    fn as_draft_store(&self) -> Option<&dyn DraftStore> {
        None
    }
}

#[async_trait]
pub trait ParentLookup: Send + Sync {
    fn parent_type(&self) -> &str;

    /// The parent of `child`, or [`Error::NotFound`].
    async fn load_parent(&self, child: &Subject) -> Result<Subject>;
}

#[async_trait]
pub trait ChildLookup: Send + Sync {
    fn child_type(&self) -> &str;

    /// A fresh, unsaved child attached to `parent`.
    fn new_child(&self, parent: &Subject) -> Subject;

    /// The child `id` of `parent`, or [`Error::NotFound`].
    async fn load_child(&self, parent: &Subject, id: SubjectId) -> Result<Subject>;

    async fn list_children(&self, parent: &Subject) -> Result<Vec<Subject>>;

    async fn reorder_children(&self, parent: &Subject, order: &[SubjectId]) -> Result<()>;
}

#[async_trait]
pub trait DraftStore: Send + Sync {
    /// The pending draft of `live`, if one has been saved.
    async fn load_draft(&self, live: &Subject) -> Result<Option<Subject>>;

    /// A fresh, unsaved draft copying `live`'s data.
    fn new_draft(&self, live: &Subject) -> Subject;
}

// ---------------------------------------------------------------------------
// StoredService
// ---------------------------------------------------------------------------

/// [`SubjectService`] for one catalog content type over a shared store.
pub struct StoredService {
    name: String,
    parent: Option<String>,
    children: Option<String>,
    drafts: bool,
    store: Arc<dyn SubjectStore>,
}

impl StoredService {
    pub fn new(content_type: &ContentType, store: Arc<dyn SubjectStore>) -> Self {
        Self {
            name: content_type.name.clone(),
            parent: content_type.parent.clone(),
            children: content_type.children.clone(),
            drafts: content_type.drafts,
            store,
        }
    }

    async fn first(&self, criteria: Criteria, what: &str) -> Result<Subject> {
        let label = criteria
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| format!("{criteria:?}"));
        let criteria = Criteria {
            limit: Some(1),
            ..criteria
        };
        self.store
            .find(&criteria)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(what, label))
    }
}

#[async_trait]
impl SubjectService for StoredService {
    fn content_type(&self) -> &str {
        &self.name
    }

    fn new_subject(&self) -> Subject {
        Subject::new(&self.name)
    }

    async fn load(&self, criteria: Criteria) -> Result<Subject> {
        let criteria = Criteria {
            content_type: Some(self.name.clone()),
            ..criteria
        };
        self.first(criteria, &self.name).await
    }

    async fn list(&self, criteria: Criteria) -> Result<Vec<Subject>> {
        let criteria = Criteria {
            content_type: Some(self.name.clone()),
            ..criteria
        };
        self.store.find(&criteria).await
    }

    async fn save(&self, subject: &mut Subject, comment: &str, by: Option<UserId>) -> Result<()> {
        if subject.content_type != self.name {
            return Err(Error::Internal(format!(
                "{} service asked to save a {}",
                self.name, subject.content_type
            )));
        }
        *subject = self.store.save(subject, comment, by).await?;
        Ok(())
    }

    async fn delete(&self, subject: &Subject, comment: &str, by: Option<UserId>) -> Result<()> {
        if subject.is_new() {
            return Ok(());
        }
        if !self.store.delete(subject, comment, by).await? {
            tracing::debug!(subject = %subject.id, "subject already deleted");
        }
        Ok(())
    }

    fn as_parent_lookup(&self) -> Option<&dyn ParentLookup> {
        self.parent.is_some().then_some(self as &dyn ParentLookup)
    }

    fn as_child_lookup(&self) -> Option<&dyn ChildLookup> {
        self.children.is_some().then_some(self as &dyn ChildLookup)
    }

    fn as_draft_store(&self) -> Option<&dyn DraftStore> {
        self.drafts.then_some(self as &dyn DraftStore)
    }
}

#[async_trait]
impl ParentLookup for StoredService {
    fn parent_type(&self) -> &str {
        self.parent.as_deref().unwrap_or_default()
    }

    async fn load_parent(&self, child: &Subject) -> Result<Subject> {
        let parent_id = child
            .parent_id
            .ok_or_else(|| Error::not_found(self.parent_type(), "(none)"))?;
        let criteria = Criteria {
            content_type: Some(self.parent_type().to_string()),
            ..Criteria::live(parent_id)
        };
        self.first(criteria, self.parent_type()).await
    }
}

#[async_trait]
impl ChildLookup for StoredService {
    fn child_type(&self) -> &str {
        self.children.as_deref().unwrap_or_default()
    }

    fn new_child(&self, parent: &Subject) -> Subject {
        let mut child = Subject::new(self.child_type());
        child.parent_id = Some(parent.id);
        child
    }

    async fn load_child(&self, parent: &Subject, id: SubjectId) -> Result<Subject> {
        let criteria = Criteria {
            id: Some(id),
            content_type: Some(self.child_type().to_string()),
            ..Criteria::children_of(parent.id)
        };
        self.first(criteria, self.child_type()).await
    }

    async fn list_children(&self, parent: &Subject) -> Result<Vec<Subject>> {
        let criteria = Criteria {
            content_type: Some(self.child_type().to_string()),
            ..Criteria::children_of(parent.id)
        };
        self.store.find(&criteria).await
    }

    async fn reorder_children(&self, parent: &Subject, order: &[SubjectId]) -> Result<()> {
        self.store.reorder(parent.id, order).await
    }
}

#[async_trait]
impl DraftStore for StoredService {
    async fn load_draft(&self, live: &Subject) -> Result<Option<Subject>> {
        let criteria = Criteria {
            content_type: Some(self.name.clone()),
            limit: Some(1),
            ..Criteria::draft_of(live.id)
        };
        Ok(self.store.find(&criteria).await?.into_iter().next())
    }

    fn new_draft(&self, live: &Subject) -> Subject {
        let mut draft = Subject::new(&self.name);
        draft.parent_id = live.parent_id;
        draft.owner_id = live.owner_id;
        draft.data = live.data.clone();
        draft.rank = live.rank;
        draft.draft_of = Some(live.id);
        draft
    }
}

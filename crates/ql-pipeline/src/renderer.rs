//! The request-scoped capability bundle handed to steps.
//!
//! A [`Renderer`] binds the service locator, the request, one [`Subject`]
//! and the resolved [`Action`]. It is only ever constructed through
//! [`Renderer::build`] (top of a request) or [`Renderer::hop`] (delegation),
//! and both resolve the action and check its permission first, so holding a
//! `Renderer` means the caller may run that action on that subject.
//!
//! Steps may mutate the subject in place but never rebind a renderer to a
//! different subject or action; delegation builds a new one.

use std::sync::Arc;

use ql_core::{Error, Result, Schema, Subject, UserId};
use ql_rules::{authorize, Facts};
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;

use crate::catalog::{Action, ContentType};
use crate::services::{CurrentUser, Services, UserDirectory};
use crate::subject::SubjectService;
use crate::verb::Verb;

// ---------------------------------------------------------------------------
// RequestState
// ---------------------------------------------------------------------------

/// Per-request state shared by every hop of one request.
#[derive(Debug)]
pub struct RequestState {
    pub verb: Verb,
    /// Decoded request body.
    pub input: Map<String, Value>,
    pub query: Map<String, Value>,
    /// Identity presented by the transport, not yet resolved to an account.
    pub user_id: Option<UserId>,
    pub request_id: Option<String>,
    current_user: OnceCell<Option<CurrentUser>>,
}

impl RequestState {
    pub fn new(verb: Verb, user_id: Option<UserId>) -> Self {
        Self {
            verb,
            input: Map::new(),
            query: Map::new(),
            user_id,
            request_id: None,
            current_user: OnceCell::new(),
        }
    }

    pub fn with_input(mut self, input: Map<String, Value>) -> Self {
        self.input = input;
        self
    }

    pub fn with_query(mut self, query: Map<String, Value>) -> Self {
        self.query = query;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// A request parameter, from the body first and then the query string.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.input.get(name).or_else(|| self.query.get(name))
    }

    /// Resolve the caller's account, at most once per request.
    pub async fn load_user(&self, users: &dyn UserDirectory) -> Result<Option<&CurrentUser>> {
        let Some(id) = self.user_id else {
            return Ok(None);
        };
        let user = self
            .current_user
            .get_or_try_init(|| async move { users.find_user(id).await })
            .await?;
        Ok(user.as_ref())
    }

    /// The caller's account if it has been resolved.
    pub fn user(&self) -> Option<&CurrentUser> {
        self.current_user.get().and_then(Option::as_ref)
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

pub struct Renderer {
    services: Arc<Services>,
    request: Arc<RequestState>,
    content_type: Arc<ContentType>,
    action: Arc<Action>,
    subject: Subject,
    depth: usize,
}

impl Renderer {
    /// Resolve `action_id` for `subject` and authorize the caller.
    ///
    /// Fails with [`Error::Configuration`] when the action does not exist for
    /// the subject's content type, and with [`Error::Unauthorized`] or
    /// [`Error::Forbidden`] when its permission rejects the caller.
    pub async fn build(
        services: Arc<Services>,
        request: Arc<RequestState>,
        subject: Subject,
        action_id: &str,
    ) -> Result<Self> {
        request.load_user(services.users.as_ref()).await?;
        Self::bind(services, request, subject, action_id, 0)
    }

    /// A renderer for a related subject, sharing this request.
    ///
    /// Permission is checked again for the nested action, and the hop fails
    /// once the configured delegation depth is exceeded.
    pub fn hop(&self, subject: Subject, action_id: &str) -> Result<Renderer> {
        let depth = self.depth + 1;
        let limit = self.services.max_delegation_depth;
        if depth > limit {
            return Err(Error::Configuration(format!(
                "delegation from {} exceeds the depth limit of {limit}",
                self.action.pipeline.label()
            )));
        }
        Self::bind(
            self.services.clone(),
            self.request.clone(),
            subject,
            action_id,
            depth,
        )
    }

    fn bind(
        services: Arc<Services>,
        request: Arc<RequestState>,
        subject: Subject,
        action_id: &str,
        depth: usize,
    ) -> Result<Self> {
        let content_type = services
            .catalog
            .content_type(&subject.content_type)
            .cloned()
            .ok_or_else(|| Error::not_found("content type", &subject.content_type))?;
        let action = services.catalog.action(&content_type.name, action_id)?;

        let renderer = Self {
            services,
            request,
            content_type,
            action,
            subject,
            depth,
        };
        authorize(
            &renderer.action.permit,
            &renderer,
            &format!("{action_id} this {}", renderer.content_type.name),
        )?;
        tracing::debug!(
            content_type = %renderer.content_type.name,
            action = action_id,
            subject = %renderer.subject.id,
            depth,
            "renderer bound"
        );
        Ok(renderer)
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn subject_mut(&mut self) -> &mut Subject {
        &mut self.subject
    }

    pub fn into_subject(self) -> Subject {
        self.subject
    }

    pub fn content_type(&self) -> &ContentType {
        &self.content_type
    }

    pub fn schema(&self) -> &Schema {
        &self.content_type.schema
    }

    /// The persistence service for this subject's content type.
    pub fn service(&self) -> Result<Arc<dyn SubjectService>> {
        self.services.service_for(&self.content_type.name)
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn request(&self) -> &RequestState {
        &self.request
    }

    pub fn input(&self) -> &Map<String, Value> {
        &self.request.input
    }

    pub fn action(&self) -> &Arc<Action> {
        &self.action
    }

    pub fn action_id(&self) -> &str {
        &self.action.id
    }

    /// Number of delegation hops between this renderer and the request.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn caller(&self) -> Option<&CurrentUser> {
        self.request.user()
    }

    pub fn caller_id(&self) -> Option<UserId> {
        self.caller().map(|u| u.id)
    }

    pub fn is_authenticated(&self) -> bool {
        self.caller().is_some()
    }

    pub fn permalink(&self) -> String {
        if self.subject.is_new() {
            format!("/{}/new", self.content_type.name)
        } else {
            format!("/{}/{}", self.content_type.name, self.subject.id)
        }
    }

    /// The subject's title field, falling back to the content type name.
    pub fn page_title(&self) -> String {
        self.content_type
            .title_field
            .as_deref()
            .and_then(|path| self.schema().get(&self.subject.data, path).ok())
            .and_then(|v| v.as_str().map(str::to_owned))
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.content_type.name.clone())
    }

    pub fn navigation_group(&self) -> Option<&str> {
        self.content_type.group.as_deref()
    }

    /// The document templates are rendered against.
    pub fn view_model(&self) -> Value {
        let s = &self.subject;
        json!({
            "subject": {
                "id": s.id,
                "content_type": s.content_type,
                "parent_id": s.parent_id,
                "owner_id": s.owner_id,
                "state": s.state,
                "data": s.data,
                "rank": s.rank,
                "draft_of": s.draft_of,
                "revision": s.revision,
                "is_new": s.is_new(),
            },
            "action": self.action.id,
            "permalink": self.permalink(),
            "title": self.page_title(),
            "group": self.navigation_group(),
            "authenticated": self.is_authenticated(),
            "user": self.caller(),
            "input": self.request.input,
        })
    }
}

impl Facts for Renderer {
    fn is_authenticated(&self) -> bool {
        Renderer::is_authenticated(self)
    }

    fn has_role(&self, role: &str) -> bool {
        self.caller().is_some_and(|u| u.roles.iter().any(|r| r == role))
    }

    fn is_owner(&self) -> bool {
        self.subject.is_owned_by(self.caller_id())
    }

    fn state(&self) -> &str {
        &self.subject.state
    }

    fn is_new(&self) -> bool {
        self.subject.is_new()
    }

    fn field(&self, path: &str) -> Option<Value> {
        self.schema()
            .get(&self.subject.data, path)
            .ok()
            .filter(|v| !v.is_null())
    }

    fn input(&self, name: &str) -> Option<Value> {
        self.request.param(name).cloned()
    }
}

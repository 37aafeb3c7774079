//! Fixtures shared by the engine's unit tests: a blog catalog, in-memory
//! collaborators and a `mark` step that records which steps ran.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use ql_core::events::EventBus;
use ql_core::{Error, ErrorKind, Result, Subject, UserId};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::catalog::{Catalog, StepConfig};
use crate::executor::{execute, Outcome};
use crate::memory::MemoryStore;
use crate::registry::{BuildContext, StepRegistry};
use crate::renderer::{Renderer, RequestState};
use crate::result::PipelineResult;
use crate::services::{Collaborators, CurrentUser, Outbound, Services, TemplateSet, UserDirectory};
use crate::sink::Sink;
use crate::step::Step;
use crate::verb::Verb;

pub(crate) const BLOG: &str = r#"{
  "content_types": {
    "post": {
      "schema": { "fields": {
        "title": { "type": "string", "required": true },
        "summary": { "type": "string" },
        "body": { "type": "string" },
        "author_id": { "type": "string" },
        "status": { "type": "string" }
      } },
      "children": "comment",
      "drafts": true,
      "title_field": "title",
      "group": "Blog",
      "actions": {
        "noop": { "permit": "anyone" },
        "view": { "permit": "anyone", "steps": [
          { "step": "mark", "label": "view" },
          { "step": "view-template", "template": "post" }
        ] },
        "json": { "permit": "anyone", "steps": [ { "step": "as-json" } ] },
        "edit": { "permit": "owner", "steps": [
          { "step": "edit-form", "template": "post-form", "fields": ["title", "body"] },
          { "step": "save" },
          { "step": "close-modal" }
        ] },
        "publish": { "permit": "owner", "steps": [
          { "step": "validate-input", "required": ["summary"] },
          { "step": "set-data" },
          { "step": "set-state", "state": "published" },
          { "step": "save", "comment": "Published" },
          { "step": "trigger-event", "event": "published" },
          { "step": "mark", "label": "published" }
        ] },
        "guarded": { "steps": [
          { "step": "if", "condition": "owner",
            "then": [ { "step": "mark", "label": "owner" } ],
            "else": [ { "step": "halt" } ] },
          { "step": "set-state", "state": "archived" },
          { "step": "save" },
          { "step": "mark", "label": "after" }
        ] },
        "create-comment": { "steps": [
          { "step": "with-child", "action": "create", "steps": [
            { "step": "set-defaults", "values": { "status": "pending" } },
            { "step": "set-data" },
            { "step": "save" }
          ] }
        ] },
        "comments": { "permit": "anyone", "steps": [
          { "step": "with-children", "action": "view" },
          { "step": "mark", "label": "done" }
        ] },
        "first-stop": { "permit": "anyone", "steps": [
          { "step": "with-children", "action": "view", "steps": [
            { "step": "mark", "label": "child" },
            { "step": "halt" }
          ] },
          { "step": "mark", "label": "unreached" }
        ] },
        "draft": { "permit": "owner", "steps": [
          { "step": "with-draft", "action": "edit-draft" }
        ] },
        "edit-draft": { "permit": "owner", "steps": [
          { "step": "set-data" },
          { "step": "save" }
        ] },
        "remove": { "permit": "owner", "steps": [
          { "step": "delete" },
          { "step": "redirect-to", "url": "/post" }
        ] },
        "reorder": { "permit": "owner", "steps": [ { "step": "sort-children" } ] },
        "byline": { "permit": "anyone", "steps": [
          { "step": "with-related", "content_type": "author", "field": "author_id", "action": "view" }
        ] },
        "goto-edit": { "permit": "anyone", "steps": [ { "step": "forward-to", "action": "edit" } ] },
        "render-view": { "permit": "anyone", "steps": [
          { "step": "mark", "label": "discarded" },
          { "step": "server-redirect", "action": "view" },
          { "step": "mark", "label": "unreached" }
        ] },
        "descend": { "permit": "anyone", "steps": [
          { "step": "with-children", "action": "climb" }
        ] },
        "announce": { "steps": [
          { "step": "webhook", "url": "http://hooks.test/post", "event": "announced" },
          { "step": "notify", "name": "announced" }
        ] }
      }
    },
    "comment": {
      "schema": { "fields": {
        "text": { "type": "string", "required": true },
        "status": { "type": "string" }
      } },
      "parent": "post",
      "actions": {
        "view": { "permit": "anyone", "steps": [ { "step": "mark", "label": "comment" } ] },
        "create": { "steps": [ { "step": "mark", "label": "create" } ] },
        "climb": { "permit": "anyone", "steps": [
          { "step": "with-parent", "action": "descend" }
        ] }
      }
    },
    "author": {
      "schema": { "fields": { "name": { "type": "string" } } },
      "actions": {
        "view": { "permit": "anyone", "steps": [ { "step": "mark", "label": "author" } ] }
      }
    }
  }
}"#;

// ---------------------------------------------------------------------------
// mark
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct MarkArgs {
    label: String,
}

/// Writes `[label]` to the sink on both verbs.
struct Mark {
    label: String,
}

fn build_mark(config: &StepConfig, _ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: MarkArgs = config.parse()?;
    Ok(Box::new(Mark { label: args.label }))
}

#[async_trait]
impl Step for Mark {
    fn name(&self) -> &'static str {
        "mark"
    }

    async fn get(&self, _r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        sink.write(&format!("[{}]", self.label));
        Ok(PipelineResult::ok())
    }

    async fn post(&self, _r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        sink.write(&format!("[{}]", self.label));
        Ok(PipelineResult::ok())
    }
}

/// Built-in kinds plus `mark`.
pub(crate) fn registry() -> StepRegistry {
    let mut registry = StepRegistry::builtin();
    registry.register("mark", build_mark);
    registry
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

pub(crate) struct MemoryUsers(BTreeMap<UserId, CurrentUser>);

impl MemoryUsers {
    pub(crate) fn new(users: impl IntoIterator<Item = CurrentUser>) -> Self {
        Self(users.into_iter().map(|u| (u.id, u)).collect())
    }
}

#[async_trait]
impl UserDirectory for MemoryUsers {
    async fn find_user(&self, id: UserId) -> Result<Option<CurrentUser>> {
        Ok(self.0.get(&id).cloned())
    }
}

/// Records every outbound call; fails them all when `fail` is set.
#[derive(Default)]
pub(crate) struct RecordingOutbound {
    pub(crate) calls: Mutex<Vec<(String, Value)>>,
    pub(crate) fail: bool,
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn post_json(&self, url: &str, body: &Value) -> Result<()> {
        self.calls.lock().push((url.to_string(), body.clone()));
        if self.fail {
            return Err(Error::integration(url, "status 503"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

pub(crate) fn user(name: &str) -> CurrentUser {
    CurrentUser {
        id: UserId::new(),
        username: name.into(),
        roles: vec![],
    }
}

pub(crate) struct Fixture {
    pub(crate) services: Arc<Services>,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) outbound: Arc<RecordingOutbound>,
    pub(crate) queue: Arc<EventBus>,
    pub(crate) owner: CurrentUser,
    pub(crate) other: CurrentUser,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::build(8, false)
    }

    pub(crate) fn with_depth(depth: usize) -> Self {
        Self::build(depth, false)
    }

    pub(crate) fn with_failing_outbound() -> Self {
        Self::build(8, true)
    }

    fn build(depth: usize, fail: bool) -> Self {
        let catalog = Arc::new(Catalog::from_json(BLOG, &registry()).expect("fixture catalog"));
        let store = Arc::new(MemoryStore::new());
        let outbound = Arc::new(RecordingOutbound {
            fail,
            ..Default::default()
        });
        let queue = Arc::new(EventBus::new(64));
        let owner = user("owner");
        let other = user("other");
        let templates = TemplateSet::new()
            .with("post", "<h1>{{subject.data.title}}</h1>")
            .with("post-form", "<form>{{form.title}}</form>");

        let services = Services::new(
            catalog,
            store.clone(),
            Collaborators {
                templates: Arc::new(templates),
                outbound: outbound.clone(),
                users: Arc::new(MemoryUsers::new([owner.clone(), other.clone()])),
                queue: queue.clone(),
                max_delegation_depth: depth,
            },
        );
        Self {
            services: Arc::new(services),
            store,
            outbound,
            queue,
            owner,
            other,
        }
    }

    pub(crate) fn seed_post(&self, title: &str) -> Subject {
        let mut post = Subject::new("post");
        post.owner_id = Some(self.owner.id);
        post.data = json!({ "title": title });
        self.store.insert(post)
    }

    pub(crate) fn seed_comment(&self, post: &Subject, text: &str) -> Subject {
        let mut comment = Subject::new("comment");
        comment.parent_id = Some(post.id);
        comment.data = json!({ "text": text });
        self.store.insert(comment)
    }

    pub(crate) async fn run(
        &self,
        subject: Subject,
        action: &str,
        verb: Verb,
        caller: Option<&CurrentUser>,
        input: Value,
    ) -> Outcome {
        let input = match input {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let request = RequestState::new(verb, caller.map(|u| u.id)).with_input(input);
        execute(self.services.clone(), Arc::new(request), subject, action).await
    }
}

pub(crate) fn error_kind(outcome: &Outcome) -> Option<ErrorKind> {
    outcome.result.error.as_ref().map(|e| e.kind())
}

//! Delegation steps: run an action against a related subject.
//!
//! Each step locates one or more related subjects, binds a nested renderer
//! to each (re-checking permission for the nested action) and runs either
//! the step's own `steps` or the related type's action pipeline with the
//! current verb. The nested result is returned unchanged, so a halt inside
//! the delegation halts the outer pipeline too.

use async_trait::async_trait;
use ql_core::{Error, Result, Subject, SubjectId};
use serde::Deserialize;
use serde_json::Value;

use crate::catalog::StepConfig;
use crate::executor::Pipeline;
use crate::registry::BuildContext;
use crate::renderer::Renderer;
use crate::result::PipelineResult;
use crate::services::NEW_TOKEN;
use crate::sink::Sink;
use crate::step::Step;
use crate::steps::param_str;
use crate::subject::{Capability, Criteria};
use crate::verb::Verb;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NestedArgs {
    action: Option<String>,
    steps: Option<Vec<StepConfig>>,
}

/// The work a delegation performs on each related subject.
struct Nested {
    action: String,
    steps: Option<Pipeline>,
}

impl Nested {
    /// `action` defaults to the action being built.
    fn build(
        ctx: &BuildContext<'_>,
        target: &str,
        action: Option<String>,
        steps: Option<Vec<StepConfig>>,
    ) -> Result<Self> {
        let action = action.unwrap_or_else(|| ctx.action_id.clone());
        ctx.require_action(target, &action)?;
        let steps = steps
            .map(|configs| ctx.nested(target, &action, "steps").build(&configs))
            .transpose()?;
        Ok(Self { action, steps })
    }

    async fn run(
        &self,
        outer: &Renderer,
        subject: Subject,
        verb: Verb,
        sink: &mut Sink,
    ) -> Result<PipelineResult> {
        let mut inner = outer.hop(subject, &self.action)?;
        let result = match &self.steps {
            Some(pipeline) => pipeline.run(&mut inner, verb, sink).await,
            None => {
                let action = inner.action().clone();
                action.pipeline.run(&mut inner, verb, sink).await
            }
        };
        Ok(result)
    }
}

fn related_type(ctx: &BuildContext<'_>, relation: Option<&String>, what: &str) -> Result<String> {
    relation.cloned().ok_or_else(|| {
        Error::Configuration(format!(
            "content type '{}' has no {what}",
            ctx.content_type
        ))
    })
}

fn missing_capability(r: &Renderer, capability: Capability) -> Error {
    Error::Configuration(format!(
        "content type '{}' does not provide {capability}",
        r.content_type().name
    ))
}

// ---------------------------------------------------------------------------
// with-parent
// ---------------------------------------------------------------------------

/// Runs against the subject's parent.
pub struct WithParent {
    nested: Nested,
}

pub fn build_with_parent(config: &StepConfig, ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: NestedArgs = config.parse()?;
    let target = related_type(ctx, ctx.def()?.parent.as_ref(), "parent")?;
    Ok(Box::new(WithParent {
        nested: Nested::build(ctx, &target, args.action, args.steps)?,
    }))
}

impl WithParent {
    async fn delegate(&self, r: &Renderer, verb: Verb, sink: &mut Sink) -> Result<PipelineResult> {
        let service = r.service()?;
        let lookup = service
            .as_parent_lookup()
            .ok_or_else(|| missing_capability(r, Capability::ParentLookup))?;
        let parent = lookup.load_parent(r.subject()).await?;
        self.nested.run(r, parent, verb, sink).await
    }
}

#[async_trait]
impl Step for WithParent {
    fn name(&self) -> &'static str {
        "with-parent"
    }

    fn requires(&self) -> &'static [Capability] {
        &[Capability::ParentLookup]
    }

    async fn get(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        self.delegate(r, Verb::Get, sink).await
    }

    async fn post(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        self.delegate(r, Verb::Post, sink).await
    }
}

// ---------------------------------------------------------------------------
// with-child
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WithChildArgs {
    #[serde(default = "default_child_token")]
    token: String,
    action: Option<String>,
    steps: Option<Vec<StepConfig>>,
}

fn default_child_token() -> String {
    "childId".into()
}

/// Runs against one child, named by a request parameter.
///
/// On GET the child must exist. On POST a missing token, the `new` token or
/// an unknown id all fall through to a fresh child owned by the caller.
pub struct WithChild {
    token: String,
    nested: Nested,
}

pub fn build_with_child(config: &StepConfig, ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: WithChildArgs = config.parse()?;
    let target = related_type(ctx, ctx.def()?.children.as_ref(), "children")?;
    Ok(Box::new(WithChild {
        token: args.token,
        nested: Nested::build(ctx, &target, args.action, args.steps)?,
    }))
}

impl WithChild {
    fn token<'r>(&self, r: &'r Renderer) -> Option<&'r str> {
        param_str(r, &self.token).filter(|t| *t != NEW_TOKEN)
    }
}

#[async_trait]
impl Step for WithChild {
    fn name(&self) -> &'static str {
        "with-child"
    }

    fn requires(&self) -> &'static [Capability] {
        &[Capability::ChildLookup]
    }

    async fn get(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        let service = r.service()?;
        let lookup = service
            .as_child_lookup()
            .ok_or_else(|| missing_capability(r, Capability::ChildLookup))?;
        let token = self.token(r).unwrap_or("(none)");
        let id: SubjectId = token
            .parse()
            .map_err(|_| Error::not_found(lookup.child_type(), token))?;
        let child = lookup.load_child(r.subject(), id).await?;
        self.nested.run(r, child, Verb::Get, sink).await
    }

    async fn post(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        let service = r.service()?;
        let lookup = service
            .as_child_lookup()
            .ok_or_else(|| missing_capability(r, Capability::ChildLookup))?;

        let existing = match self.token(r).and_then(|t| t.parse::<SubjectId>().ok()) {
            Some(id) => match lookup.load_child(r.subject(), id).await {
                Ok(child) => Some(child),
                Err(Error::NotFound { .. }) => {
                    tracing::debug!(%id, "child not found; creating a new one");
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };
        let child = match existing {
            Some(child) => child,
            None => {
                let mut child = lookup.new_child(r.subject());
                child.owner_id = r.caller_id();
                child
            }
        };
        self.nested.run(r, child, Verb::Post, sink).await
    }
}

// ---------------------------------------------------------------------------
// with-children
// ---------------------------------------------------------------------------

/// Runs against every child in rank order, stopping at the first halt.
pub struct WithChildren {
    nested: Nested,
}

pub fn build_with_children(config: &StepConfig, ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: NestedArgs = config.parse()?;
    let target = related_type(ctx, ctx.def()?.children.as_ref(), "children")?;
    Ok(Box::new(WithChildren {
        nested: Nested::build(ctx, &target, args.action, args.steps)?,
    }))
}

impl WithChildren {
    async fn each(&self, r: &Renderer, verb: Verb, sink: &mut Sink) -> Result<PipelineResult> {
        let service = r.service()?;
        let lookup = service
            .as_child_lookup()
            .ok_or_else(|| missing_capability(r, Capability::ChildLookup))?;
        let children = lookup.list_children(r.subject()).await?;
        tracing::debug!(parent = %r.subject().id, count = children.len(), "visiting children");

        let mut acc = PipelineResult::ok();
        for child in children {
            acc = acc.merge(self.nested.run(r, child, verb, sink).await?);
            if acc.halt {
                break;
            }
        }
        Ok(acc)
    }
}

#[async_trait]
impl Step for WithChildren {
    fn name(&self) -> &'static str {
        "with-children"
    }

    fn requires(&self) -> &'static [Capability] {
        &[Capability::ChildLookup]
    }

    async fn get(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        self.each(r, Verb::Get, sink).await
    }

    async fn post(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        self.each(r, Verb::Post, sink).await
    }
}

// ---------------------------------------------------------------------------
// with-draft
// ---------------------------------------------------------------------------

/// Runs against the subject's working draft.
///
/// GET requires the draft to exist; POST starts one from the live copy
/// when there is none.
pub struct WithDraft {
    nested: Nested,
}

pub fn build_with_draft(config: &StepConfig, ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: NestedArgs = config.parse()?;
    let target = ctx.content_type.clone();
    Ok(Box::new(WithDraft {
        nested: Nested::build(ctx, &target, args.action, args.steps)?,
    }))
}

impl WithDraft {
    async fn delegate(&self, r: &Renderer, verb: Verb, sink: &mut Sink) -> Result<PipelineResult> {
        let service = r.service()?;
        let drafts = service
            .as_draft_store()
            .ok_or_else(|| missing_capability(r, Capability::DraftStore))?;
        let live = r.subject();
        let draft = match drafts.load_draft(live).await? {
            Some(draft) => draft,
            None if verb == Verb::Post => drafts.new_draft(live),
            None => return Err(Error::not_found("draft", live.id)),
        };
        self.nested.run(r, draft, verb, sink).await
    }
}

#[async_trait]
impl Step for WithDraft {
    fn name(&self) -> &'static str {
        "with-draft"
    }

    fn requires(&self) -> &'static [Capability] {
        &[Capability::DraftStore]
    }

    async fn get(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        self.delegate(r, Verb::Get, sink).await
    }

    async fn post(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        self.delegate(r, Verb::Post, sink).await
    }
}

// ---------------------------------------------------------------------------
// with-related
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WithRelatedArgs {
    content_type: String,
    field: String,
    action: Option<String>,
    steps: Option<Vec<StepConfig>>,
}

/// Runs against a subject of another type whose id is stored in a field.
pub struct WithRelated {
    content_type: String,
    field: String,
    nested: Nested,
}

pub fn build_with_related(config: &StepConfig, ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: WithRelatedArgs = config.parse()?;
    ctx.type_def(&args.content_type)?;
    ctx.require_path(&args.field)?;
    Ok(Box::new(WithRelated {
        nested: Nested::build(ctx, &args.content_type, args.action, args.steps)?,
        content_type: args.content_type,
        field: args.field,
    }))
}

impl WithRelated {
    async fn delegate(&self, r: &Renderer, verb: Verb, sink: &mut Sink) -> Result<PipelineResult> {
        let value = r.schema().get(&r.subject().data, &self.field)?;
        let token = match &value {
            Value::String(s) if !s.trim().is_empty() => s.trim(),
            _ => return Err(Error::not_found(&self.content_type, "(none)")),
        };
        let id: SubjectId = token
            .parse()
            .map_err(|_| Error::not_found(&self.content_type, token))?;
        let related = r
            .services()
            .service_for(&self.content_type)?
            .load(Criteria::id(id))
            .await?;
        self.nested.run(r, related, verb, sink).await
    }
}

#[async_trait]
impl Step for WithRelated {
    fn name(&self) -> &'static str {
        "with-related"
    }

    async fn get(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        self.delegate(r, Verb::Get, sink).await
    }

    async fn post(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        self.delegate(r, Verb::Post, sink).await
    }
}

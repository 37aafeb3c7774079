//! Pipeline executor: runs an ordered list of [`Step`]s for one verb against
//! one [`Renderer`], folding their results together.
//!
//! Execution is strictly sequential. After every step the accumulated
//! result is checked and the run stops as soon as it is halted. Steps that
//! already ran are never retried or rolled back.

use std::sync::Arc;

use ql_core::Subject;
use tracing::Instrument;

use crate::renderer::{Renderer, RequestState};
use crate::result::PipelineResult;
use crate::services::Services;
use crate::sink::Sink;
use crate::step::Step;
use crate::verb::Verb;

/// An ordered list of steps, labelled with where it sits in the catalog
/// (e.g. `post/view/steps` or `post/edit/steps[1].then`).
pub struct Pipeline {
    label: String,
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    pub fn new(label: impl Into<String>, steps: Vec<Box<dyn Step>>) -> Self {
        Self {
            label: label.into(),
            steps,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step kinds in execution order.
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step for `verb` until one halts.
    ///
    /// A step failure is wrapped with the step's kind and location
    /// (`post/publish/steps[2]`) and ends the run.
    pub async fn run(&self, r: &mut Renderer, verb: Verb, sink: &mut Sink) -> PipelineResult {
        let span = tracing::debug_span!("pipeline", action = %self.label, %verb);
        async move {
            let mut acc = PipelineResult::ok();
            for (index, step) in self.steps.iter().enumerate() {
                tracing::debug!(step = step.name(), index, "running step");
                let outcome = match verb {
                    Verb::Get => step.get(r, sink).await,
                    Verb::Post => step.post(r, sink).await,
                };
                let result = outcome.unwrap_or_else(|e| {
                    let e = e.in_step(step.name(), format!("{}[{index}]", self.label));
                    tracing::debug!(error = %e, "step failed");
                    PipelineResult::error(e)
                });
                acc = acc.merge(result);
                if acc.halt {
                    tracing::debug!(step = step.name(), index, "pipeline halted");
                    break;
                }
            }
            acc
        }
        .instrument(span)
        .await
    }
}

/// What a top-level run produced.
#[derive(Debug)]
pub struct Outcome {
    pub result: PipelineResult,
    pub body: String,
    /// The subject as the last step left it; `None` when the run was
    /// rejected before any step ran.
    pub subject: Option<Subject>,
}

/// Resolve `action_id` for `subject`, authorize the caller, and run the
/// action's pipeline for the request's verb.
///
/// Resolution and permission failures are returned without running any
/// step.
pub async fn execute(
    services: Arc<Services>,
    request: Arc<RequestState>,
    subject: Subject,
    action_id: &str,
) -> Outcome {
    let verb = request.verb;
    let span = tracing::info_span!(
        "action",
        content_type = %subject.content_type,
        action = action_id,
        %verb,
    );
    async move {
        let mut renderer = match Renderer::build(services, request, subject, action_id).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "action rejected");
                return Outcome {
                    result: PipelineResult::error(e),
                    body: String::new(),
                    subject: None,
                };
            }
        };
        let action = renderer.action().clone();
        let mut sink = Sink::new();
        let result = action.pipeline.run(&mut renderer, verb, &mut sink).await;
        Outcome {
            result,
            body: sink.into_body(),
            subject: Some(renderer.into_subject()),
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::{Criteria, SubjectStore};
    use crate::testing::{error_kind, Fixture};
    use ql_core::events::EventPayload;
    use ql_core::ErrorKind;
    use serde_json::json;

    #[tokio::test]
    async fn view_renders_for_anonymous_caller() {
        let fx = Fixture::new();
        let post = fx.seed_post("Hello");

        let out = fx.run(post, "view", Verb::Get, None, json!({})).await;

        assert!(out.result.error.is_none(), "{:?}", out.result.error);
        assert_eq!(out.result.status, None);
        assert!(!out.result.halt);
        assert_eq!(out.body, "[view]<h1>Hello</h1>");
        assert_eq!(
            out.result.content_type.as_deref(),
            Some("text/html; charset=utf-8")
        );
    }

    #[tokio::test]
    async fn empty_pipeline_is_ok() {
        let fx = Fixture::new();
        let post = fx.seed_post("Hello");

        let out = fx.run(post, "noop", Verb::Post, None, json!({})).await;

        assert_eq!(out.result, PipelineResult::ok());
        assert!(out.body.is_empty());
    }

    #[tokio::test]
    async fn anonymous_edit_is_rejected_before_any_step() {
        let fx = Fixture::new();
        let post = fx.seed_post("Hello");

        let out = fx
            .run(post, "edit", Verb::Post, None, json!({ "title": "Hacked" }))
            .await;

        assert_eq!(error_kind(&out), Some(ErrorKind::Unauthorized));
        assert!(out.result.halt);
        assert!(out.subject.is_none());
        assert!(out.body.is_empty());
        assert_eq!(fx.store.changes().len(), 0);
    }

    #[tokio::test]
    async fn other_user_edit_is_forbidden() {
        let fx = Fixture::new();
        let post = fx.seed_post("Hello");

        let out = fx
            .run(post, "edit", Verb::Post, Some(&fx.other), json!({ "title": "Mine" }))
            .await;

        assert_eq!(error_kind(&out), Some(ErrorKind::Forbidden));
        assert_eq!(fx.store.changes().len(), 0);
    }

    #[tokio::test]
    async fn unknown_action_is_a_configuration_error() {
        let fx = Fixture::new();
        let post = fx.seed_post("Hello");

        let out = fx.run(post, "frobnicate", Verb::Get, None, json!({})).await;

        assert_eq!(error_kind(&out), Some(ErrorKind::Configuration));
        assert!(out.subject.is_none());
    }

    #[tokio::test]
    async fn publish_without_summary_fails_validation_and_saves_nothing() {
        let fx = Fixture::new();
        let post = fx.seed_post("Hello");
        let id = post.id;

        let out = fx
            .run(post, "publish", Verb::Post, Some(&fx.owner), json!({ "body": "text" }))
            .await;

        assert_eq!(error_kind(&out), Some(ErrorKind::Validation));
        let err = out.result.error.as_ref().unwrap();
        assert!(
            err.to_string().starts_with("post/publish/steps[0] [validate-input]"),
            "got: {err}"
        );
        assert!(err.to_string().contains("summary is required"), "got: {err}");
        assert!(!out.body.contains("[published]"));
        assert!(out.result.events.is_empty());
        assert_eq!(fx.store.changes().len(), 0);
        assert_eq!(fx.store.get(id).unwrap().state, "draft");
    }

    #[tokio::test]
    async fn publish_with_summary_saves_and_signals() {
        let fx = Fixture::new();
        let post = fx.seed_post("Hello");
        let id = post.id;
        let mut rx = fx.queue.subscribe();

        let out = fx
            .run(post, "publish", Verb::Post, Some(&fx.owner), json!({ "summary": "Short" }))
            .await;

        assert!(out.result.error.is_none(), "{:?}", out.result.error);
        assert_eq!(out.body, "[published]");
        assert_eq!(out.result.events.get("published").map(String::as_str), Some("true"));

        let stored = fx.store.get(id).unwrap();
        assert_eq!(stored.state, "published");
        assert_eq!(stored.data["summary"], "Short");
        assert_eq!(stored.revision, 2);
        assert_eq!(fx.store.changes()[0].comment, "Published");

        match rx.try_recv().unwrap().payload {
            EventPayload::SubjectSaved { subject_id, user_id, .. } => {
                assert_eq!(subject_id, id);
                assert_eq!(user_id, Some(fx.owner.id));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_child_falls_through_to_new_child_on_post() {
        let fx = Fixture::new();
        let post = fx.seed_post("Hello");
        let post_id = post.id;

        for token in [json!("new"), json!(ql_core::SubjectId::new().to_string())] {
            let out = fx
                .run(
                    post.clone(),
                    "create-comment",
                    Verb::Post,
                    Some(&fx.other),
                    json!({ "childId": token, "text": "Nice post" }),
                )
                .await;
            assert!(out.result.error.is_none(), "{:?}", out.result.error);
        }

        let comments = fx
            .store
            .find(&Criteria::children_of(post_id))
            .await
            .unwrap();
        assert_eq!(comments.len(), 2);
        for comment in comments {
            assert_eq!(comment.content_type, "comment");
            assert_eq!(comment.owner_id, Some(fx.other.id));
            assert_eq!(comment.data["text"], "Nice post");
            assert_eq!(comment.data["status"], "pending");
            assert_eq!(comment.revision, 1);
        }
    }

    #[tokio::test]
    async fn create_child_on_get_requires_an_existing_child() {
        let fx = Fixture::new();
        let post = fx.seed_post("Hello");

        let out = fx
            .run(post, "create-comment", Verb::Get, Some(&fx.other), json!({ "childId": "new" }))
            .await;

        assert_eq!(error_kind(&out), Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn conditional_else_halt_stops_without_error_or_mutation() {
        let fx = Fixture::new();
        let post = fx.seed_post("Hello");
        let id = post.id;

        let out = fx
            .run(post, "guarded", Verb::Post, Some(&fx.other), json!({}))
            .await;

        assert!(out.result.halt);
        assert!(out.result.error.is_none());
        assert!(out.body.is_empty());
        assert_eq!(fx.store.changes().len(), 0);
        assert_eq!(fx.store.get(id).unwrap().state, "draft");
    }

    #[tokio::test]
    async fn conditional_then_branch_continues_for_owner() {
        let fx = Fixture::new();
        let post = fx.seed_post("Hello");
        let id = post.id;

        let out = fx
            .run(post, "guarded", Verb::Post, Some(&fx.owner), json!({}))
            .await;

        assert!(!out.result.halt);
        assert_eq!(out.body, "[owner][after]");
        assert_eq!(fx.store.get(id).unwrap().state, "archived");
    }

    #[tokio::test]
    async fn halt_inside_delegation_halts_the_outer_pipeline() {
        let fx = Fixture::new();
        let post = fx.seed_post("Hello");
        fx.seed_comment(&post, "one");
        fx.seed_comment(&post, "two");

        let out = fx.run(post, "first-stop", Verb::Get, None, json!({})).await;

        assert!(out.result.halt);
        assert!(out.result.error.is_none());
        assert_eq!(out.body, "[child]");
    }

    #[tokio::test]
    async fn with_children_visits_every_child_in_rank_order() {
        let fx = Fixture::new();
        let post = fx.seed_post("Hello");
        fx.seed_comment(&post, "one");
        fx.seed_comment(&post, "two");

        let out = fx.run(post, "comments", Verb::Get, None, json!({})).await;

        assert!(out.result.error.is_none(), "{:?}", out.result.error);
        assert_eq!(out.body, "[comment][comment][done]");
    }

    #[tokio::test]
    async fn delegation_depth_is_bounded() {
        let fx = Fixture::with_depth(3);
        let post = fx.seed_post("Hello");
        fx.seed_comment(&post, "loop");

        let out = fx.run(post, "descend", Verb::Get, None, json!({})).await;

        assert_eq!(error_kind(&out), Some(ErrorKind::Configuration));
        let err = out.result.error.as_ref().unwrap();
        assert!(err.to_string().contains("depth limit of 3"), "got: {err}");
    }

    #[tokio::test]
    async fn nested_error_carries_its_location() {
        let fx = Fixture::new();
        let post = fx.seed_post("Hello");

        // A comment without text fails the comment schema inside the delegation.
        let out = fx
            .run(post, "create-comment", Verb::Post, Some(&fx.other), json!({}))
            .await;

        assert_eq!(error_kind(&out), Some(ErrorKind::Validation));
        let text = out.result.error.as_ref().unwrap().to_string();
        assert!(
            text.starts_with("post/create-comment/steps[0].steps[2] [save]"),
            "got: {text}"
        );

        // The save was rejected by the schema before reaching the store.
        assert!(fx.store.changes().is_empty());
        assert_eq!(fx.store.len(), 1);
    }

    #[tokio::test]
    async fn set_data_type_error_never_reaches_the_store() {
        let fx = Fixture::new();
        let post = fx.seed_post("Hello");

        let out = fx
            .run(
                post,
                "create-comment",
                Verb::Post,
                Some(&fx.other),
                json!({ "text": { "nested": true } }),
            )
            .await;

        assert_eq!(error_kind(&out), Some(ErrorKind::Validation));
        let text = out.result.error.as_ref().unwrap().to_string();
        assert!(
            text.starts_with("post/create-comment/steps[0].steps[1] [set-data]"),
            "got: {text}"
        );
        assert!(fx.store.changes().is_empty());
        assert_eq!(fx.store.len(), 1);
    }

    // -- Pipeline::run with counting steps ------------------------------

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use ql_core::Error;

    enum Then {
        Continue,
        Halt,
        Fail,
        ErrorWithoutHalt,
    }

    struct Counting {
        calls: Arc<AtomicUsize>,
        then: Then,
    }

    #[async_trait]
    impl Step for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn get(&self, _r: &mut Renderer, sink: &mut Sink) -> ql_core::Result<PipelineResult> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            sink.write(&n.to_string());
            match self.then {
                Then::Continue => Ok(PipelineResult::ok()),
                Then::Halt => Ok(PipelineResult::halt().with_status(204)),
                Then::Fail => Err(Error::Validation("boom".into())),
                Then::ErrorWithoutHalt => Ok(PipelineResult {
                    error: Some(Arc::new(Error::Validation("unhalted".into()))),
                    ..PipelineResult::ok()
                }),
            }
        }
    }

    fn counting(then: Then) -> (Arc<AtomicUsize>, Box<dyn Step>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let step = Box::new(Counting {
            calls: calls.clone(),
            then,
        });
        (calls, step)
    }

    async fn renderer(fx: &Fixture) -> Renderer {
        let post = fx.seed_post("Counted");
        let request = Arc::new(RequestState::new(Verb::Get, None));
        Renderer::build(fx.services.clone(), request, post, "view")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn every_step_runs_once_in_order() {
        let fx = Fixture::new();
        let mut r = renderer(&fx).await;
        let (a, first) = counting(Then::Continue);
        let (b, second) = counting(Then::Continue);
        let pipeline = Pipeline::new("test", vec![first, second]);

        let mut sink = Sink::new();
        let result = pipeline.run(&mut r, Verb::Get, &mut sink).await;

        assert!(!result.halt);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(sink.into_body(), "00");
    }

    #[tokio::test]
    async fn halt_skips_later_steps() {
        let fx = Fixture::new();
        let mut r = renderer(&fx).await;
        let (a, first) = counting(Then::Continue);
        let (b, second) = counting(Then::Halt);
        let (c, third) = counting(Then::Continue);
        let pipeline = Pipeline::new("test", vec![first, second, third]);

        let mut sink = Sink::new();
        let result = pipeline.run(&mut r, Verb::Get, &mut sink).await;

        assert!(result.halt);
        assert_eq!(result.status, Some(204));
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(c.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_is_located_and_stops_the_run() {
        let fx = Fixture::new();
        let mut r = renderer(&fx).await;
        let (_, first) = counting(Then::Continue);
        let (_, second) = counting(Then::Fail);
        let (c, third) = counting(Then::Continue);
        let pipeline = Pipeline::new("test", vec![first, second, third]);

        let mut sink = Sink::new();
        let result = pipeline.run(&mut r, Verb::Get, &mut sink).await;

        assert!(result.halt);
        let err = result.error.as_ref().unwrap();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().starts_with("test[1] [counting]"), "got: {err}");
        assert_eq!(c.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn an_error_stops_the_run_even_without_halt() {
        let fx = Fixture::new();
        let mut r = renderer(&fx).await;
        let (a, first) = counting(Then::ErrorWithoutHalt);
        let (b, second) = counting(Then::Continue);
        let pipeline = Pipeline::new("test", vec![first, second]);

        let mut sink = Sink::new();
        let result = pipeline.run(&mut r, Verb::Get, &mut sink).await;

        assert!(result.halt);
        assert_eq!(result.error.as_ref().unwrap().kind(), ErrorKind::Validation);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
        assert_eq!(sink.into_body(), "0");
    }

    #[tokio::test]
    async fn post_uses_the_default_noop() {
        let fx = Fixture::new();
        let mut r = renderer(&fx).await;
        let (a, first) = counting(Then::Halt);
        let pipeline = Pipeline::new("test", vec![first]);

        let mut sink = Sink::new();
        let result = pipeline.run(&mut r, Verb::Post, &mut sink).await;

        assert!(!result.halt);
        assert_eq!(a.load(Ordering::SeqCst), 0);
    }
}

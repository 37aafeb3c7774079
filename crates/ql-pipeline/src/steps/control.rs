//! Terminal and control steps: halting, redirects, headers and client
//! events.

use async_trait::async_trait;
use ql_core::{Error, Result};
use serde::Deserialize;

use crate::catalog::StepConfig;
use crate::registry::BuildContext;
use crate::renderer::Renderer;
use crate::result::PipelineResult;
use crate::sink::Sink;
use crate::step::Step;
use crate::verb::Verb;

/// Header the client follows after a partial request.
pub const REDIRECT_HEADER: &str = "HX-Redirect";

fn no_args(config: &StepConfig) -> Result<()> {
    if config.args.is_empty() {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "{} takes no arguments",
            config.step
        )))
    }
}

// ---------------------------------------------------------------------------
// halt
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct HaltArgs {
    status: Option<u16>,
}

/// Stops the pipeline, optionally with a status code.
pub struct Halt {
    status: Option<u16>,
}

pub fn build_halt(config: &StepConfig, _ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: HaltArgs = config.parse()?;
    if let Some(status) = args.status {
        if !(100..=599).contains(&status) {
            return Err(Error::Configuration(format!("invalid status {status}")));
        }
    }
    Ok(Box::new(Halt {
        status: args.status,
    }))
}

impl Halt {
    fn result(&self) -> PipelineResult {
        let result = PipelineResult::halt();
        match self.status {
            Some(status) => result.with_status(status),
            None => result,
        }
    }
}

#[async_trait]
impl Step for Halt {
    fn name(&self) -> &'static str {
        "halt"
    }

    async fn get(&self, _r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        Ok(self.result())
    }

    async fn post(&self, _r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        Ok(self.result())
    }
}

// ---------------------------------------------------------------------------
// forward-to / redirect-to
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ActionArgs {
    action: String,
}

/// Sends the client to another action on the same subject.
pub struct ForwardTo {
    action: String,
}

pub fn build_forward_to(config: &StepConfig, ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: ActionArgs = config.parse()?;
    ctx.require_action(&ctx.content_type, &args.action)?;
    Ok(Box::new(ForwardTo {
        action: args.action,
    }))
}

impl ForwardTo {
    fn result(&self, r: &Renderer) -> PipelineResult {
        let target = format!("{}/{}", r.permalink(), self.action);
        PipelineResult::halt().with_header(REDIRECT_HEADER, target)
    }
}

#[async_trait]
impl Step for ForwardTo {
    fn name(&self) -> &'static str {
        "forward-to"
    }

    async fn get(&self, r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        Ok(self.result(r))
    }

    async fn post(&self, r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        Ok(self.result(r))
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RedirectArgs {
    url: String,
}

/// Sends the client to a URL. `{{permalink}}`, `{{id}}` and
/// `{{parent_id}}` are substituted from the current subject.
pub struct RedirectTo {
    url: String,
}

pub fn build_redirect_to(config: &StepConfig, _ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: RedirectArgs = config.parse()?;
    if args.url.trim().is_empty() {
        return Err(Error::Configuration("redirect url must not be empty".into()));
    }
    Ok(Box::new(RedirectTo { url: args.url }))
}

impl RedirectTo {
    fn target(&self, r: &Renderer) -> String {
        let subject = r.subject();
        let parent = subject.parent_id.map(|id| id.to_string()).unwrap_or_default();
        self.url
            .replace("{{permalink}}", &r.permalink())
            .replace("{{id}}", &subject.id.to_string())
            .replace("{{parent_id}}", &parent)
    }

    fn result(&self, r: &Renderer) -> PipelineResult {
        PipelineResult::halt().with_header(REDIRECT_HEADER, self.target(r))
    }
}

#[async_trait]
impl Step for RedirectTo {
    fn name(&self) -> &'static str {
        "redirect-to"
    }

    async fn get(&self, r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        Ok(self.result(r))
    }

    async fn post(&self, r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        Ok(self.result(r))
    }
}

// ---------------------------------------------------------------------------
// server-redirect
// ---------------------------------------------------------------------------

/// Discards the body so far and renders another action's GET for the same
/// subject, then halts.
pub struct ServerRedirect {
    action: String,
}

pub fn build_server_redirect(config: &StepConfig, ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: ActionArgs = config.parse()?;
    ctx.require_action(&ctx.content_type, &args.action)?;
    Ok(Box::new(ServerRedirect {
        action: args.action,
    }))
}

impl ServerRedirect {
    async fn render(&self, r: &Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        let mut target = r.hop(r.subject().clone(), &self.action)?;
        sink.clear();
        let action = target.action().clone();
        let result = action.pipeline.run(&mut target, Verb::Get, sink).await;
        Ok(result.with_halt())
    }
}

#[async_trait]
impl Step for ServerRedirect {
    fn name(&self) -> &'static str {
        "server-redirect"
    }

    async fn get(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        self.render(r, sink).await
    }

    async fn post(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        self.render(r, sink).await
    }
}

// ---------------------------------------------------------------------------
// trigger-event / set-header / close-modal / full-page
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TriggerArgs {
    event: String,
    #[serde(default = "default_event_value")]
    value: String,
}

fn default_event_value() -> String {
    "true".into()
}

/// Raises a client-side event after a successful POST.
pub struct TriggerEvent {
    event: String,
    value: String,
}

pub fn build_trigger_event(config: &StepConfig, _ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: TriggerArgs = config.parse()?;
    if args.event.trim().is_empty() {
        return Err(Error::Configuration("event name must not be empty".into()));
    }
    Ok(Box::new(TriggerEvent {
        event: args.event,
        value: args.value,
    }))
}

#[async_trait]
impl Step for TriggerEvent {
    fn name(&self) -> &'static str {
        "trigger-event"
    }

    async fn post(&self, _r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        Ok(PipelineResult::ok().with_event(self.event.clone(), self.value.clone()))
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct HeaderArgs {
    name: String,
    value: String,
}

pub struct SetHeader {
    name: String,
    value: String,
}

pub fn build_set_header(config: &StepConfig, _ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: HeaderArgs = config.parse()?;
    let valid = !args.name.is_empty()
        && args
            .name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if !valid {
        return Err(Error::Configuration(format!(
            "invalid header name '{}'",
            args.name
        )));
    }
    Ok(Box::new(SetHeader {
        name: args.name,
        value: args.value,
    }))
}

#[async_trait]
impl Step for SetHeader {
    fn name(&self) -> &'static str {
        "set-header"
    }

    async fn get(&self, _r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        Ok(PipelineResult::ok().with_header(self.name.clone(), self.value.clone()))
    }

    async fn post(&self, _r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        Ok(PipelineResult::ok().with_header(self.name.clone(), self.value.clone()))
    }
}

/// Tells the client to dismiss the modal the form was shown in.
pub struct CloseModal;

pub fn build_close_modal(config: &StepConfig, _ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    no_args(config)?;
    Ok(Box::new(CloseModal))
}

#[async_trait]
impl Step for CloseModal {
    fn name(&self) -> &'static str {
        "close-modal"
    }

    async fn post(&self, _r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        Ok(PipelineResult::halt().with_event("closeModal", "true"))
    }
}

/// Marks the body as a complete page that must not be wrapped in the layout.
pub struct FullPage;

pub fn build_full_page(config: &StepConfig, _ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    no_args(config)?;
    Ok(Box::new(FullPage))
}

#[async_trait]
impl Step for FullPage {
    fn name(&self) -> &'static str {
        "full-page"
    }

    async fn get(&self, _r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        Ok(PipelineResult::ok().with_full_page())
    }

    async fn post(&self, _r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        Ok(PipelineResult::ok().with_full_page())
    }
}

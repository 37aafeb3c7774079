//! Integration steps: talk to services outside the request.

use async_trait::async_trait;
use ql_core::events::{EventCategory, EventPayload};
use ql_core::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::catalog::StepConfig;
use crate::registry::BuildContext;
use crate::renderer::Renderer;
use crate::result::PipelineResult;
use crate::sink::Sink;
use crate::step::Step;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WebhookArgs {
    url: String,
    event: Option<String>,
}

/// Posts the subject to a URL and waits for the answer. A failed delivery
/// fails the pipeline.
pub struct Webhook {
    url: String,
    event: Option<String>,
}

pub fn build_webhook(config: &StepConfig, _ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: WebhookArgs = config.parse()?;
    if !(args.url.starts_with("http://") || args.url.starts_with("https://")) {
        return Err(Error::Configuration(format!(
            "webhook url '{}' must be http(s)",
            args.url
        )));
    }
    Ok(Box::new(Webhook {
        url: args.url,
        event: args.event,
    }))
}

#[async_trait]
impl Step for Webhook {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn post(&self, r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        let subject = r.subject();
        let body = json!({
            "event": self.event.as_deref().unwrap_or(r.action_id()),
            "content_type": subject.content_type,
            "action": r.action_id(),
            "subject": {
                "id": subject.id,
                "state": subject.state,
                "revision": subject.revision,
                "data": subject.data,
            },
            "user_id": r.caller_id(),
        });
        r.services().outbound.post_json(&self.url, &body).await?;
        tracing::debug!(url = %self.url, subject = %subject.id, "webhook delivered");
        Ok(PipelineResult::ok())
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NotifyArgs {
    name: String,
    #[serde(default)]
    data: Value,
}

/// Queues a named notification for background delivery. Never waits.
pub struct Notify {
    name: String,
    data: Value,
}

pub fn build_notify(config: &StepConfig, _ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: NotifyArgs = config.parse()?;
    if args.name.trim().is_empty() {
        return Err(Error::Configuration("notification name must not be empty".into()));
    }
    Ok(Box::new(Notify {
        name: args.name,
        data: args.data,
    }))
}

#[async_trait]
impl Step for Notify {
    fn name(&self) -> &'static str {
        "notify"
    }

    async fn post(&self, r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        let subject = r.subject();
        r.services().queue.broadcast(
            EventCategory::User,
            EventPayload::Notification {
                name: self.name.clone(),
                subject_id: subject.id,
                content_type: subject.content_type.clone(),
                data: self.data.clone(),
            },
        );
        Ok(PipelineResult::ok())
    }
}

//! Built-in pipeline steps.
//!
//! Steps are grouped by family. Each one is constructed from its catalog
//! arguments by a `build` function registered under its kind in
//! [`register_builtins`].

mod conditional;
mod control;
mod delegation;
mod display;
mod integration;
mod mutation;

use async_trait::async_trait;
use ql_core::{Error, Result};
use serde_json::Value;

pub use control::REDIRECT_HEADER;

use crate::registry::StepRegistry;
use crate::renderer::Renderer;
use crate::result::PipelineResult;
use crate::sink::Sink;
use crate::step::Step;

/// Register every built-in step kind.
pub fn register_builtins(registry: &mut StepRegistry) {
    // display
    registry.register("view-template", display::build_view_template);
    registry.register("as-json", display::build_as_json);
    registry.register("edit-form", display::build_edit_form);
    // mutation
    registry.register("validate-input", mutation::build_validate_input);
    registry.register("set-data", mutation::build_set_data);
    registry.register("set-state", mutation::build_set_state);
    registry.register("set-defaults", mutation::build_set_defaults);
    registry.register("save", mutation::build_save);
    registry.register("delete", mutation::build_delete);
    registry.register("sort-children", mutation::build_sort_children);
    // delegation
    registry.register("with-parent", delegation::build_with_parent);
    registry.register("with-child", delegation::build_with_child);
    registry.register("with-children", delegation::build_with_children);
    registry.register("with-draft", delegation::build_with_draft);
    registry.register("with-related", delegation::build_with_related);
    // conditional
    registry.register("if", conditional::build_if);
    // terminal / control
    registry.register("halt", control::build_halt);
    registry.register("forward-to", control::build_forward_to);
    registry.register("redirect-to", control::build_redirect_to);
    registry.register("server-redirect", control::build_server_redirect);
    registry.register("trigger-event", control::build_trigger_event);
    registry.register("set-header", control::build_set_header);
    registry.register("close-modal", control::build_close_modal);
    registry.register("full-page", control::build_full_page);
    // integration
    registry.register("webhook", integration::build_webhook);
    registry.register("notify", integration::build_notify);
}

/// Stand-in for a step kind the registry does not know.
///
/// Only built by a lenient registry. Every invocation fails with a
/// configuration error.
pub struct UnknownStep {
    kind: String,
}

impl UnknownStep {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
        }
    }

    fn fail(&self) -> Result<PipelineResult> {
        Err(Error::Configuration(format!(
            "step kind '{}' is not registered",
            self.kind
        )))
    }
}

#[async_trait]
impl Step for UnknownStep {
    fn name(&self) -> &'static str {
        "unknown"
    }

    async fn get(&self, _r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        self.fail()
    }

    async fn post(&self, _r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        self.fail()
    }
}

/// Null, blank strings and empty containers count as "no value".
pub(crate) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// A request parameter as a non-empty string.
pub(crate) fn param_str<'r>(r: &'r Renderer, name: &str) -> Option<&'r str> {
    r.request()
        .param(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

//! Display steps: render the subject into the sink.

use async_trait::async_trait;
use ql_core::{Error, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::catalog::StepConfig;
use crate::registry::BuildContext;
use crate::renderer::Renderer;
use crate::result::PipelineResult;
use crate::sink::Sink;
use crate::step::Step;
use crate::steps::mutation::apply_values;

const HTML: &str = "text/html; charset=utf-8";

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TemplateArgs {
    template: String,
}

/// Renders a named template against the renderer's view model.
pub struct ViewTemplate {
    template: String,
}

pub fn build_view_template(config: &StepConfig, _ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: TemplateArgs = config.parse()?;
    Ok(Box::new(ViewTemplate {
        template: args.template,
    }))
}

#[async_trait]
impl Step for ViewTemplate {
    fn name(&self) -> &'static str {
        "view-template"
    }

    async fn get(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        let html = r.services().templates.render(&self.template, &r.view_model())?;
        sink.write(&html);
        Ok(PipelineResult::ok().with_content_type(HTML))
    }
}

/// Replaces the body with the subject as JSON.
pub struct AsJson;

pub fn build_as_json(config: &StepConfig, _ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    if !config.args.is_empty() {
        return Err(Error::Configuration("as-json takes no arguments".into()));
    }
    Ok(Box::new(AsJson))
}

#[async_trait]
impl Step for AsJson {
    fn name(&self) -> &'static str {
        "as-json"
    }

    async fn get(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        write_subject_json(r, sink)
    }

    /// After a write, answers with the subject as the earlier steps left it.
    async fn post(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        write_subject_json(r, sink)
    }
}

fn write_subject_json(r: &Renderer, sink: &mut Sink) -> Result<PipelineResult> {
    let model = r.view_model();
    let body = serde_json::to_string(&model["subject"])
        .map_err(|e| Error::Internal(format!("subject serialization failed: {e}")))?;
    sink.clear();
    sink.write(&body);
    Ok(PipelineResult::ok()
        .with_content_type("application/json")
        .with_full_page())
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EditFormArgs {
    template: String,
    #[serde(default)]
    fields: Vec<String>,
}

/// GET renders an edit form; POST applies the submitted fields to the
/// in-memory subject (a later `save` persists them).
pub struct EditForm {
    template: String,
    /// Editable paths; empty means every top-level schema field.
    fields: Vec<String>,
}

pub fn build_edit_form(config: &StepConfig, ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: EditFormArgs = config.parse()?;
    let fields = if args.fields.is_empty() {
        ctx.schema()?.fields.keys().cloned().collect()
    } else {
        for path in &args.fields {
            ctx.require_path(path)?;
        }
        args.fields
    };
    Ok(Box::new(EditForm {
        template: args.template,
        fields,
    }))
}

#[async_trait]
impl Step for EditForm {
    fn name(&self) -> &'static str {
        "edit-form"
    }

    async fn get(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        let mut form = Map::new();
        for path in &self.fields {
            let value = r.schema().get(&r.subject().data, path)?;
            form.insert(path.clone(), value);
        }
        let mut model = r.view_model();
        model["form"] = Value::Object(form);
        let html = r.services().templates.render(&self.template, &model)?;
        sink.write(&html);
        Ok(PipelineResult::ok().with_content_type(HTML))
    }

    async fn post(&self, r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        let submitted: Vec<(String, Value)> = self
            .fields
            .iter()
            .filter_map(|path| r.input().get(path).map(|v| (path.clone(), v.clone())))
            .collect();
        apply_values(r, submitted)?;
        Ok(PipelineResult::ok())
    }
}

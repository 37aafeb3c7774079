//! Mutation steps: change the subject in memory and persist it.
//!
//! Everything except `save`, `delete` and `sort-children` only touches the
//! renderer's copy of the subject. Nothing reaches storage until a `save`
//! step runs, so a pipeline that fails validation leaves no trace.

use async_trait::async_trait;
use ql_core::events::{EventCategory, EventPayload};
use ql_core::{Error, Result, SubjectId};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::catalog::StepConfig;
use crate::registry::BuildContext;
use crate::renderer::Renderer;
use crate::result::PipelineResult;
use crate::sink::Sink;
use crate::step::Step;
use crate::steps::is_blank;
use crate::subject::Capability;

/// Write `values` into the subject's data through its schema.
///
/// Values are coerced first; if any fails, nothing is written and every
/// problem is reported in one validation error.
pub(crate) fn apply_values(r: &mut Renderer, values: Vec<(String, Value)>) -> Result<()> {
    let mut data = r.subject().data.clone();
    let mut problems = Vec::new();
    let schema = r.schema();
    for (path, value) in values {
        if let Err(e) = schema.set(&mut data, &path, value) {
            problems.push(problem(e));
        }
    }
    if !problems.is_empty() {
        return Err(Error::Validation(problems.join("; ")));
    }
    r.subject_mut().data = data;
    Ok(())
}

fn problem(e: Error) -> String {
    match e {
        Error::Validation(msg) => msg,
        other => other.to_string(),
    }
}

/// Request input whose names are schema paths.
fn known_input(r: &Renderer) -> Vec<(String, Value)> {
    let schema = r.schema();
    r.input()
        .iter()
        .filter(|(name, _)| schema.has_path(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// validate-input
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ValidateArgs {
    #[serde(default)]
    required: Vec<String>,
}

/// Checks the submitted input against the schema without applying it.
pub struct ValidateInput {
    /// Paths that must be non-empty for this action, beyond the schema's
    /// own required fields.
    required: Vec<String>,
}

pub fn build_validate_input(config: &StepConfig, ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: ValidateArgs = config.parse()?;
    for path in &args.required {
        ctx.require_path(path)?;
    }
    Ok(Box::new(ValidateInput {
        required: args.required,
    }))
}

#[async_trait]
impl Step for ValidateInput {
    fn name(&self) -> &'static str {
        "validate-input"
    }

    async fn post(&self, r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        let schema = r.schema();
        let mut candidate = r.subject().data.clone();
        let mut problems = Vec::new();

        for (path, value) in known_input(r) {
            if let Err(e) = schema.set(&mut candidate, &path, value) {
                problems.push(problem(e));
            }
        }
        for path in &self.required {
            if is_blank(&schema.get(&candidate, path)?) {
                problems.push(format!("{path} is required"));
            }
        }
        if let Err(e) = schema.validate(&candidate) {
            let msg = problem(e);
            for part in msg.split("; ") {
                if !problems.iter().any(|p| p == part) {
                    problems.push(part.to_string());
                }
            }
        }

        if problems.is_empty() {
            Ok(PipelineResult::ok())
        } else {
            tracing::debug!(problems = problems.len(), "input rejected");
            Err(Error::Validation(problems.join("; ")))
        }
    }
}

// ---------------------------------------------------------------------------
// set-data
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SetDataArgs {
    #[serde(default)]
    values: Map<String, Value>,
    #[serde(default)]
    from_input: Vec<String>,
}

/// Applies literal values and/or request input to the subject.
///
/// With no arguments every input parameter naming a schema path is copied.
pub struct SetData {
    values: Map<String, Value>,
    from_input: Vec<String>,
}

pub fn build_set_data(config: &StepConfig, ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: SetDataArgs = config.parse()?;
    let schema = ctx.schema()?;
    for (path, value) in &args.values {
        schema.check(path, value.clone())?;
    }
    for path in &args.from_input {
        ctx.require_path(path)?;
    }
    Ok(Box::new(SetData {
        values: args.values,
        from_input: args.from_input,
    }))
}

#[async_trait]
impl Step for SetData {
    fn name(&self) -> &'static str {
        "set-data"
    }

    async fn post(&self, r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        let mut values: Vec<(String, Value)> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if self.values.is_empty() && self.from_input.is_empty() {
            values.extend(known_input(r));
        } else {
            values.extend(
                self.from_input
                    .iter()
                    .filter_map(|path| r.input().get(path).map(|v| (path.clone(), v.clone()))),
            );
        }
        apply_values(r, values)?;
        Ok(PipelineResult::ok())
    }
}

// ---------------------------------------------------------------------------
// set-state
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SetStateArgs {
    state: String,
}

pub struct SetState {
    state: String,
}

pub fn build_set_state(config: &StepConfig, _ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: SetStateArgs = config.parse()?;
    if args.state.trim().is_empty() {
        return Err(Error::Configuration("state must not be empty".into()));
    }
    Ok(Box::new(SetState { state: args.state }))
}

#[async_trait]
impl Step for SetState {
    fn name(&self) -> &'static str {
        "set-state"
    }

    async fn post(&self, r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        r.subject_mut().state = self.state.clone();
        Ok(PipelineResult::ok())
    }
}

// ---------------------------------------------------------------------------
// set-defaults
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SetDefaultsArgs {
    #[serde(default)]
    values: Map<String, Value>,
}

/// Fills empty fields with defaults and claims unowned subjects for the
/// caller. Runs on both verbs so forms for new subjects show the defaults.
pub struct SetDefaults {
    values: Map<String, Value>,
}

pub fn build_set_defaults(config: &StepConfig, ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: SetDefaultsArgs = config.parse()?;
    let schema = ctx.schema()?;
    for (path, value) in &args.values {
        schema.check(path, value.clone())?;
    }
    Ok(Box::new(SetDefaults {
        values: args.values,
    }))
}

impl SetDefaults {
    fn apply(&self, r: &mut Renderer) -> Result<PipelineResult> {
        let mut missing = Vec::new();
        for (path, value) in &self.values {
            if is_blank(&r.schema().get(&r.subject().data, path)?) {
                missing.push((path.clone(), value.clone()));
            }
        }
        apply_values(r, missing)?;
        if r.subject().owner_id.is_none() {
            let caller = r.caller_id();
            r.subject_mut().owner_id = caller;
        }
        Ok(PipelineResult::ok())
    }
}

#[async_trait]
impl Step for SetDefaults {
    fn name(&self) -> &'static str {
        "set-defaults"
    }

    async fn get(&self, r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        self.apply(r)
    }

    async fn post(&self, r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        self.apply(r)
    }
}

// ---------------------------------------------------------------------------
// save / delete
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CommentArgs {
    comment: Option<String>,
}

/// Persists the subject after a final schema check.
pub struct Save {
    comment: Option<String>,
}

pub fn build_save(config: &StepConfig, _ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: CommentArgs = config.parse()?;
    Ok(Box::new(Save {
        comment: args.comment,
    }))
}

#[async_trait]
impl Step for Save {
    fn name(&self) -> &'static str {
        "save"
    }

    async fn post(&self, r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        r.schema().validate(&r.subject().data)?;

        let service = r.service()?;
        let by = r.caller_id();
        let comment = self
            .comment
            .clone()
            .unwrap_or_else(|| format!("{} via {}", r.content_type().name, r.action_id()));
        service.save(r.subject_mut(), &comment, by).await?;

        let subject = r.subject();
        tracing::info!(
            subject = %subject.id,
            revision = subject.revision,
            content_type = %subject.content_type,
            "subject saved"
        );
        r.services().queue.broadcast(
            EventCategory::User,
            EventPayload::SubjectSaved {
                subject_id: subject.id,
                content_type: subject.content_type.clone(),
                comment,
                user_id: by,
            },
        );
        Ok(PipelineResult::ok())
    }
}

/// Removes the subject. Deleting something already gone is not an error.
pub struct Delete {
    comment: Option<String>,
}

pub fn build_delete(config: &StepConfig, _ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: CommentArgs = config.parse()?;
    Ok(Box::new(Delete {
        comment: args.comment,
    }))
}

#[async_trait]
impl Step for Delete {
    fn name(&self) -> &'static str {
        "delete"
    }

    async fn post(&self, r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        let service = r.service()?;
        let by = r.caller_id();
        let comment = self
            .comment
            .clone()
            .unwrap_or_else(|| format!("deleted via {}", r.action_id()));
        let subject = r.subject();
        service.delete(subject, &comment, by).await?;

        tracing::info!(subject = %subject.id, content_type = %subject.content_type, "subject deleted");
        r.services().queue.broadcast(
            EventCategory::Admin,
            EventPayload::SubjectDeleted {
                subject_id: subject.id,
                content_type: subject.content_type.clone(),
                comment,
                user_id: by,
            },
        );
        Ok(PipelineResult::ok())
    }
}

// ---------------------------------------------------------------------------
// sort-children
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SortArgs {
    #[serde(default = "default_order_param")]
    input: String,
}

fn default_order_param() -> String {
    "order".into()
}

/// Reorders the subject's children from a list of ids in the request.
///
/// The parameter may be a JSON array of ids or a comma-separated string.
pub struct SortChildren {
    input: String,
}

pub fn build_sort_children(config: &StepConfig, _ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: SortArgs = config.parse()?;
    Ok(Box::new(SortChildren { input: args.input }))
}

fn parse_order(value: Option<&Value>, param: &str) -> Result<Vec<SubjectId>> {
    let tokens: Vec<String> = match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(String::from).unwrap_or_else(|| v.to_string()))
            .collect(),
        Some(other) => {
            return Err(Error::Validation(format!(
                "{param} must be a list of ids, got {other}"
            )))
        }
    };
    tokens
        .iter()
        .map(|t| {
            t.parse::<SubjectId>()
                .map_err(|_| Error::Validation(format!("{param}: '{t}' is not a valid id")))
        })
        .collect()
}

#[async_trait]
impl Step for SortChildren {
    fn name(&self) -> &'static str {
        "sort-children"
    }

    fn requires(&self) -> &'static [Capability] {
        &[Capability::ChildLookup]
    }

    async fn post(&self, r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        let order = parse_order(r.request().param(&self.input), &self.input)?;
        if order.is_empty() {
            return Err(Error::Validation(format!("{} is required", self.input)));
        }
        let service = r.service()?;
        let lookup = service.as_child_lookup().ok_or_else(|| {
            Error::Configuration(format!(
                "content type '{}' has no children to sort",
                r.content_type().name
            ))
        })?;
        lookup.reorder_children(r.subject(), &order).await?;
        tracing::debug!(parent = %r.subject().id, count = order.len(), "children reordered");
        Ok(PipelineResult::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_from_comma_list_and_array() {
        let a = SubjectId::new();
        let b = SubjectId::new();
        let csv = json!(format!("{a}, {b}"));
        assert_eq!(parse_order(Some(&csv), "order").unwrap(), vec![a, b]);
        let list = json!([b.to_string(), a.to_string()]);
        assert_eq!(parse_order(Some(&list), "order").unwrap(), vec![b, a]);
        assert!(parse_order(None, "order").unwrap().is_empty());
    }

    #[test]
    fn bad_order_is_validation() {
        let err = parse_order(Some(&json!("nope")), "order").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = parse_order(Some(&json!(5)), "order").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}

//! The action catalog: content types, their schemas and relationships, and
//! the actions defined on them.
//!
//! A catalog is loaded from JSON once and is immutable afterwards. Loading
//! builds every step of every action through the [`StepRegistry`], so an
//! unknown step kind, a forward to a missing action, a step placed on a
//! content type that lacks the capability it needs, or a condition naming a
//! field the schema does not declare is reported at startup. All problems
//! are collected and reported together.
//!
//! ```json
//! {
//!   "content_types": {
//!     "post": {
//!       "schema": { "fields": { "title": { "type": "string", "required": true } } },
//!       "children": "comment",
//!       "title_field": "title",
//!       "actions": {
//!         "view": { "permit": "anyone", "steps": [{ "step": "view-template", "template": "post" }] }
//!       }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use ql_core::{Error, Result, Schema};
use ql_rules::{Condition, Expr};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::executor::Pipeline;
use crate::registry::{BuildContext, StepRegistry};
use crate::subject::Capability;

// ---------------------------------------------------------------------------
// Definitions (as written in the catalog file)
// ---------------------------------------------------------------------------

/// One step entry: its kind plus kind-specific arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub step: String,
    #[serde(flatten)]
    pub args: Map<String, Value>,
}

impl StepConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            step: kind.into(),
            args: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    /// Deserialize the arguments into a step's typed settings.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.args.clone()))
            .map_err(|e| Error::Configuration(format!("invalid arguments: {e}")))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogDef {
    #[serde(default)]
    pub content_types: BTreeMap<String, ContentTypeDef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentTypeDef {
    #[serde(default)]
    pub schema: Schema,
    /// Content type of this type's parent.
    pub parent: Option<String>,
    /// Content type of this type's children.
    pub children: Option<String>,
    /// Whether subjects of this type keep pending drafts.
    #[serde(default)]
    pub drafts: bool,
    /// Schema path used as the page title.
    pub title_field: Option<String>,
    /// Navigation group shown in the page chrome.
    pub group: Option<String>,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionDef>,
}

impl ContentTypeDef {
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();
        if self.parent.is_some() {
            caps.push(Capability::ParentLookup);
        }
        if self.children.is_some() {
            caps.push(Capability::ChildLookup);
        }
        if self.drafts {
            caps.push(Capability::DraftStore);
        }
        caps
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionDef {
    /// Who may run the action. Defaults to any signed-in caller.
    #[serde(default = "default_permit")]
    pub permit: Expr,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

fn default_permit() -> Expr {
    Expr::Condition(Condition::Authenticated)
}

// ---------------------------------------------------------------------------
// Loaded catalog
// ---------------------------------------------------------------------------

/// A named, authorization-gated pipeline on a content type.
pub struct Action {
    pub id: String,
    pub content_type: String,
    pub permit: Expr,
    pub pipeline: Pipeline,
}

pub struct ContentType {
    pub name: String,
    pub schema: Schema,
    pub parent: Option<String>,
    pub children: Option<String>,
    pub drafts: bool,
    pub title_field: Option<String>,
    pub group: Option<String>,
    pub actions: BTreeMap<String, Arc<Action>>,
}

impl ContentType {
    pub fn action(&self, id: &str) -> Option<&Arc<Action>> {
        self.actions.get(id)
    }
}

pub struct Catalog {
    types: BTreeMap<String, Arc<ContentType>>,
}

impl Catalog {
    pub fn from_json(json: &str, registry: &StepRegistry) -> Result<Self> {
        let def: CatalogDef = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("catalog parse error: {e}")))?;
        Self::from_def(&def, registry)
    }

    /// Validate `def` and build every action's pipeline.
    pub fn from_def(def: &CatalogDef, registry: &StepRegistry) -> Result<Self> {
        let mut problems = Vec::new();
        let mut types = BTreeMap::new();

        for (name, ct) in &def.content_types {
            for (relation, target) in [("parent", &ct.parent), ("children", &ct.children)] {
                if let Some(target) = target {
                    if !def.content_types.contains_key(target) {
                        problems.push(format!(
                            "{name}: {relation} names unknown content type '{target}'"
                        ));
                    }
                }
            }
            if let Some(path) = &ct.title_field {
                if !ct.schema.has_path(path) {
                    problems.push(format!("{name}: title_field '{path}' is not in the schema"));
                }
            }

            let mut actions = BTreeMap::new();
            for (id, action) in &ct.actions {
                for path in action.permit.field_paths() {
                    if !ct.schema.has_path(path) {
                        problems.push(format!(
                            "{name}/{id}: permit reads unknown field path '{path}'"
                        ));
                    }
                }
                let ctx = BuildContext::new(registry, def, name, id);
                match ctx.build(&action.steps) {
                    Ok(pipeline) => {
                        actions.insert(
                            id.clone(),
                            Arc::new(Action {
                                id: id.clone(),
                                content_type: name.clone(),
                                permit: action.permit.clone(),
                                pipeline,
                            }),
                        );
                    }
                    Err(e) => problems.push(message(&e)),
                }
            }

            types.insert(
                name.clone(),
                Arc::new(ContentType {
                    name: name.clone(),
                    schema: ct.schema.clone(),
                    parent: ct.parent.clone(),
                    children: ct.children.clone(),
                    drafts: ct.drafts,
                    title_field: ct.title_field.clone(),
                    group: ct.group.clone(),
                    actions,
                }),
            );
        }

        if !problems.is_empty() {
            return Err(Error::Configuration(problems.join("; ")));
        }
        tracing::debug!(content_types = types.len(), "catalog loaded");
        Ok(Self { types })
    }

    pub fn content_type(&self, name: &str) -> Option<&Arc<ContentType>> {
        self.types.get(name)
    }

    pub fn content_types(&self) -> impl Iterator<Item = &ContentType> {
        self.types.values().map(|ct| ct.as_ref())
    }

    /// Resolve an action. An unknown content type or action id is a
    /// configuration defect.
    pub fn action(&self, content_type: &str, id: &str) -> Result<Arc<Action>> {
        self.types
            .get(content_type)
            .and_then(|ct| ct.action(id))
            .cloned()
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "action '{id}' is not defined for content type '{content_type}'"
                ))
            })
    }

    /// Total number of actions across all content types.
    pub fn action_count(&self) -> usize {
        self.types.values().map(|ct| ct.actions.len()).sum()
    }
}

/// Error text without the variant prefix, for stacking into one report.
pub(crate) fn message(e: &Error) -> String {
    match e {
        Error::Configuration(msg) => msg.clone(),
        Error::PathNotFound(path) => format!("unknown field path '{path}'"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{error_kind, registry, Fixture, BLOG};
    use crate::verb::Verb;
    use ql_core::ErrorKind;
    use serde_json::json;

    fn load(json: &str) -> Result<Catalog> {
        Catalog::from_json(json, &registry())
    }

    fn problems(json: &str) -> String {
        match load(json) {
            Ok(_) => panic!("catalog should not load"),
            Err(Error::Configuration(msg)) => msg,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn fixture_catalog_loads() {
        let catalog = load(BLOG).unwrap();
        let post = catalog.content_type("post").unwrap();
        assert_eq!(post.children.as_deref(), Some("comment"));
        assert!(post.drafts);
        assert_eq!(
            post.action("publish").unwrap().pipeline.step_names(),
            vec!["validate-input", "set-data", "set-state", "save", "trigger-event", "mark"]
        );
        assert!(catalog.action_count() > 20);
    }

    #[test]
    fn permit_defaults_to_authenticated() {
        let catalog = load(
            r#"{"content_types": {"note": {"actions": {"view": {"steps": []}}}}}"#,
        )
        .unwrap();
        let action = catalog.action("note", "view").unwrap();
        assert_eq!(action.permit, Expr::Condition(Condition::Authenticated));
    }

    #[test]
    fn unknown_action_is_configuration() {
        let catalog = load(BLOG).unwrap();
        let err = catalog.action("post", "nope").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn unknown_step_kind_fails_strict_load() {
        let msg = problems(
            r#"{"content_types": {"note": {"actions": {
                "view": {"steps": [{"step": "frobnicate"}]}
            }}}}"#,
        );
        assert!(msg.contains("note/view/steps[0]"), "got: {msg}");
        assert!(msg.contains("unknown step kind 'frobnicate'"), "got: {msg}");
    }

    #[test]
    fn all_problems_are_reported_together() {
        let msg = problems(
            r#"{"content_types": {
              "note": {
                "schema": {"fields": {"title": {"type": "string"}}},
                "parent": "folder",
                "title_field": "heading",
                "actions": {
                  "sort": {"steps": [{"step": "sort-children"}]},
                  "check": {"steps": [{"step": "validate-input", "required": ["missing"]}]},
                  "jump": {"steps": [{"step": "forward-to", "action": "nowhere"}]},
                  "guard": {"permit": {"type": "condition", "condition": {"type": "field_present", "value": "secret"}}},
                  "bad": {"steps": [{"step": "halt", "code": 3}]}
                }
              }
            }}"#,
        );
        for needle in [
            "parent names unknown content type 'folder'",
            "title_field 'heading'",
            "note/sort/steps[0] [sort-children]: content type 'note' provides no child lookup",
            "note/check/steps[0] [validate-input]: unknown field path 'missing'",
            "action 'nowhere' is not defined",
            "permit reads unknown field path 'secret'",
            "note/bad/steps[0] [halt]: invalid arguments",
        ] {
            assert!(msg.contains(needle), "missing {needle:?} in: {msg}");
        }
    }

    #[test]
    fn nested_steps_are_validated_against_the_related_type() {
        let msg = problems(
            r#"{"content_types": {
              "post": {"children": "comment", "actions": {
                "add": {"steps": [{"step": "with-child", "action": "create", "steps": [
                  {"step": "set-data", "from_input": ["title"]}
                ]}]}
              }},
              "comment": {"schema": {"fields": {"text": {"type": "string"}}}, "parent": "post",
                "actions": {"create": {}}}
            }}"#,
        );
        assert!(
            msg.contains("post/add/steps[0].steps[0] [set-data]: unknown field path 'title'"),
            "got: {msg}"
        );
    }

    #[tokio::test]
    async fn lenient_registry_defers_unknown_kinds_to_request_time() {
        let json = r#"{"content_types": {"note": {"actions": {
            "view": {"permit": "anyone", "steps": [{"step": "frobnicate"}]}
        }}}}"#;
        let catalog = Catalog::from_json(json, &registry().strict(false)).unwrap();
        let action = catalog.action("note", "view").unwrap();
        assert_eq!(action.pipeline.step_names(), vec!["unknown"]);

        // Run it through a fixture whose catalog contains the lenient type.
        let fx = Fixture::new();
        let services = crate::services::Services {
            catalog: Arc::new(catalog),
            subjects: Default::default(),
            templates: fx.services.templates.clone(),
            outbound: fx.services.outbound.clone(),
            users: fx.services.users.clone(),
            queue: fx.services.queue.clone(),
            max_delegation_depth: 8,
        };
        let request = crate::renderer::RequestState::new(Verb::Get, None);
        let out = crate::executor::execute(
            Arc::new(services),
            Arc::new(request),
            ql_core::Subject::new("note"),
            "view",
        )
        .await;
        assert_eq!(error_kind(&out), Some(ErrorKind::Configuration));
        let text = out.result.error.as_ref().unwrap().to_string();
        assert!(text.contains("step kind 'frobnicate' is not registered"), "got: {text}");
    }

    #[test]
    fn step_config_round_trips_flattened_arguments() {
        let config: StepConfig =
            serde_json::from_value(json!({"step": "set-state", "state": "published"})).unwrap();
        assert_eq!(config, StepConfig::new("set-state").with("state", json!("published")));
    }
}

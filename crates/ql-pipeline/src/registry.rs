//! Step registry: construct [`Step`] objects from [`StepConfig`] values.
//!
//! The registry maps a step kind (`"save"`, `"with-child"`, ...) to a
//! constructor. Catalog loading runs every constructor eagerly, so argument
//! errors and capability mismatches surface before any request is served.

use std::collections::BTreeMap;

use ql_core::{Error, Result, Schema};
use ql_rules::Expr;

use crate::catalog::{message, CatalogDef, ContentTypeDef, StepConfig};
use crate::executor::Pipeline;
use crate::step::Step;
use crate::steps;
use crate::subject::Capability;

/// Builds one step from its configuration.
pub type StepBuilder = fn(&StepConfig, &BuildContext<'_>) -> Result<Box<dyn Step>>;

pub struct StepRegistry {
    builders: BTreeMap<&'static str, StepBuilder>,
    strict: bool,
}

impl StepRegistry {
    /// A strict registry with no step kinds.
    pub fn empty() -> Self {
        Self {
            builders: BTreeMap::new(),
            strict: true,
        }
    }

    /// A strict registry with every built-in step kind.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        steps::register_builtins(&mut registry);
        registry
    }

    /// In lenient mode an unknown kind builds a sentinel step that fails
    /// every request instead of failing the catalog load.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn register(&mut self, kind: &'static str, builder: StepBuilder) {
        self.builders.insert(kind, builder);
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.builders.keys().copied()
    }

    /// Build a pipeline from `configs` in the context `ctx`.
    pub fn build(&self, configs: &[StepConfig], ctx: &BuildContext<'_>) -> Result<Pipeline> {
        let mut steps: Vec<Box<dyn Step>> = Vec::with_capacity(configs.len());
        for (index, config) in configs.iter().enumerate() {
            let location = format!("{}[{index}]", ctx.label);
            steps.push(self.build_step(config, ctx, location)?);
        }
        Ok(Pipeline::new(ctx.label.clone(), steps))
    }

    fn build_step(
        &self,
        config: &StepConfig,
        ctx: &BuildContext<'_>,
        location: String,
    ) -> Result<Box<dyn Step>> {
        let Some(builder) = self.builders.get(config.step.as_str()) else {
            if self.strict {
                return Err(Error::Configuration(format!(
                    "{location}: unknown step kind '{}'",
                    config.step
                )));
            }
            tracing::warn!(%location, kind = %config.step, "unknown step kind; requests will fail");
            return Ok(Box::new(steps::UnknownStep::new(&config.step)));
        };

        let step_ctx = BuildContext {
            location,
            ..ctx.clone()
        };
        let step = builder(config, &step_ctx).map_err(|e| {
            Error::Configuration(format!(
                "{} [{}]: {}",
                step_ctx.location,
                config.step,
                message(&e)
            ))
        })?;

        let available = step_ctx.capabilities();
        if let Some(missing) = step.requires().iter().find(|c| !available.contains(*c)) {
            return Err(Error::Configuration(format!(
                "{} [{}]: content type '{}' provides no {missing}",
                step_ctx.location, config.step, step_ctx.content_type
            )));
        }
        Ok(step)
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// BuildContext
// ---------------------------------------------------------------------------

/// Where a step is being built: which catalog, content type and action, and
/// its position in the tree.
#[derive(Clone)]
pub struct BuildContext<'a> {
    pub registry: &'a StepRegistry,
    pub catalog: &'a CatalogDef,
    pub content_type: String,
    pub action_id: String,
    /// Label of the pipeline being built, e.g. `post/edit/steps`.
    pub label: String,
    /// Location of the step being built, e.g. `post/edit/steps[2]`.
    pub location: String,
}

impl<'a> BuildContext<'a> {
    /// Context for the top-level pipeline of `content_type`/`action_id`.
    pub fn new(
        registry: &'a StepRegistry,
        catalog: &'a CatalogDef,
        content_type: &str,
        action_id: &str,
    ) -> Self {
        let label = format!("{content_type}/{action_id}/steps");
        Self {
            registry,
            catalog,
            content_type: content_type.to_string(),
            action_id: action_id.to_string(),
            location: label.clone(),
            label,
        }
    }

    /// Build `configs` as a pipeline in this context.
    pub fn build(&self, configs: &[StepConfig]) -> Result<Pipeline> {
        self.registry.build(configs, self)
    }

    /// Context for a sub-list of the current step (`then`, `steps`, ...)
    /// that runs against a subject of `content_type` under `action_id`.
    pub fn nested(&self, content_type: &str, action_id: &str, branch: &str) -> Self {
        let label = format!("{}.{branch}", self.location);
        Self {
            registry: self.registry,
            catalog: self.catalog,
            content_type: content_type.to_string(),
            action_id: action_id.to_string(),
            location: label.clone(),
            label,
        }
    }

    pub fn def(&self) -> Result<&'a ContentTypeDef> {
        self.type_def(&self.content_type)
    }

    pub fn type_def(&self, content_type: &str) -> Result<&'a ContentTypeDef> {
        self.catalog.content_types.get(content_type).ok_or_else(|| {
            Error::Configuration(format!("unknown content type '{content_type}'"))
        })
    }

    pub fn schema(&self) -> Result<&'a Schema> {
        Ok(&self.def()?.schema)
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        self.def().map(|d| d.capabilities()).unwrap_or_default()
    }

    /// Fail unless `path` is declared by the current schema.
    pub fn require_path(&self, path: &str) -> Result<()> {
        self.schema()?.field(path).map(|_| ())
    }

    /// Fail unless every field `expr` reads is declared by the current schema.
    pub fn require_condition(&self, expr: &Expr) -> Result<()> {
        expr.field_paths()
            .into_iter()
            .try_for_each(|path| self.require_path(path))
    }

    /// Fail unless `content_type` defines `action_id`.
    pub fn require_action(&self, content_type: &str, action_id: &str) -> Result<()> {
        if self.type_def(content_type)?.actions.contains_key(action_id) {
            Ok(())
        } else {
            Err(Error::Configuration(format!(
                "action '{action_id}' is not defined for content type '{content_type}'"
            )))
        }
    }
}

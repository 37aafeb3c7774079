//! The `if` step: branch on a condition evaluated against the renderer.

use async_trait::async_trait;
use ql_core::Result;
use ql_rules::{evaluate, Expr};
use serde::Deserialize;

use crate::catalog::StepConfig;
use crate::executor::Pipeline;
use crate::registry::BuildContext;
use crate::renderer::Renderer;
use crate::result::PipelineResult;
use crate::sink::Sink;
use crate::step::Step;
use crate::verb::Verb;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct IfArgs {
    condition: Expr,
    #[serde(default)]
    then: Vec<StepConfig>,
    #[serde(default, rename = "else")]
    otherwise: Vec<StepConfig>,
}

/// Runs `then` when the condition holds and `else` otherwise, on the same
/// subject. A missing branch does nothing.
pub struct If {
    condition: Expr,
    then: Pipeline,
    otherwise: Pipeline,
}

pub fn build_if(config: &StepConfig, ctx: &BuildContext<'_>) -> Result<Box<dyn Step>> {
    let args: IfArgs = config.parse()?;
    ctx.require_condition(&args.condition)?;
    let branch = |name: &str, configs: &[StepConfig]| {
        ctx.nested(&ctx.content_type, &ctx.action_id, name)
            .build(configs)
    };
    Ok(Box::new(If {
        then: branch("then", &args.then)?,
        otherwise: branch("else", &args.otherwise)?,
        condition: args.condition,
    }))
}

impl If {
    async fn branch(&self, r: &mut Renderer, verb: Verb, sink: &mut Sink) -> PipelineResult {
        let holds = evaluate(&self.condition, &*r);
        tracing::debug!(holds, "condition evaluated");
        let branch = if holds { &self.then } else { &self.otherwise };
        branch.run(r, verb, sink).await
    }
}

#[async_trait]
impl Step for If {
    fn name(&self) -> &'static str {
        "if"
    }

    async fn get(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        Ok(self.branch(r, Verb::Get, sink).await)
    }

    async fn post(&self, r: &mut Renderer, sink: &mut Sink) -> Result<PipelineResult> {
        Ok(self.branch(r, Verb::Post, sink).await)
    }
}

//! The [`Step`] trait defines a single unit of pipeline behaviour.
//!
//! Each step has a read operation ([`Step::get`]) and a write operation
//! ([`Step::post`]). Both default to a neutral no-op so a step only
//! implements the verbs it cares about. A step returns `Err` for a failure
//! it can name; the executor wraps it with the step's location and turns it
//! into a halting [`PipelineResult`].

use async_trait::async_trait;
use ql_core::Result;

use crate::renderer::Renderer;
use crate::result::PipelineResult;
use crate::sink::Sink;
use crate::subject::Capability;

#[async_trait]
pub trait Step: Send + Sync {
    /// The registry kind this step was built from (e.g. `"with-child"`).
    fn name(&self) -> &'static str;

    /// Capabilities the subject's content type must provide.
    ///
    /// Checked once when the catalog is loaded.
    fn requires(&self) -> &'static [Capability] {
        &[]
    }

    /// Read operation. Must not durably mutate the subject.
    async fn get(&self, _r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        Ok(PipelineResult::ok())
    }

    /// Write operation.
    async fn post(&self, _r: &mut Renderer, _sink: &mut Sink) -> Result<PipelineResult> {
        Ok(PipelineResult::ok())
    }
}

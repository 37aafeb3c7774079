//! # ql-pipeline
//!
//! The action pipeline engine.
//!
//! This crate provides:
//!
//! - **[`Catalog`]** -- content types, their schemas and relationships, and
//!   the actions defined on them, loaded once from JSON and validated up
//!   front.
//! - **[`Step`]** trait -- one unit of behaviour with a GET and a POST half.
//!   The built-in kinds live in [`steps`] and are looked up by name through
//!   the [`StepRegistry`].
//! - **[`Renderer`]** -- the per-invocation context binding a subject, an
//!   action and the request, and answering permission queries.
//! - **[`Pipeline`]** / [`execute`] -- run an action's steps in order, fold
//!   their [`PipelineResult`]s and stop at the first halt.
//! - **[`SubjectService`]** and its capability traits -- typed persistence
//!   for one content type, over any [`SubjectStore`] backend. [`MemoryStore`]
//!   is the in-process backend.

pub mod catalog;
pub mod executor;
pub mod memory;
pub mod registry;
pub mod renderer;
pub mod result;
pub mod services;
pub mod sink;
pub mod step;
pub mod steps;
pub mod subject;
pub mod verb;

#[cfg(test)]
mod testing;

// Re-export key types at the crate root.
pub use catalog::{Action, Catalog, CatalogDef, ContentType, StepConfig};
pub use executor::{execute, Outcome, Pipeline};
pub use memory::MemoryStore;
pub use registry::{BuildContext, StepRegistry};
pub use renderer::{Renderer, RequestState};
pub use result::PipelineResult;
pub use services::{
    Collaborators, CurrentUser, Outbound, Services, TemplateEngine, TemplateSet, UserDirectory,
    NEW_TOKEN,
};
pub use sink::Sink;
pub use step::Step;
pub use subject::{Capability, Criteria, StoredService, SubjectService, SubjectStore};
pub use verb::Verb;

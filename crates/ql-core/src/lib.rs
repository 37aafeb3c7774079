//! ql-core: shared types, IDs, errors, configuration, schema validation and
//! the background event bus.
//!
//! This crate is the foundational dependency for all other ql-* crates,
//! providing type-safe identifiers, a unified error type with a stable
//! error taxonomy, application configuration, the schema collaborator used
//! by mutation steps, and a broadcast bus for fire-and-forget work.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod schema;
pub mod subject;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, ErrorKind, Result};
pub use ids::*;
pub use schema::{Field, FieldType, Schema};
pub use subject::Subject;

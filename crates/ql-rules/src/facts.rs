//! The read-only view predicates are evaluated against.

use serde_json::Value;

/// Facts about the current caller and subject.
///
/// Implemented by the pipeline's renderer; evaluation never mutates
/// anything reachable from here.
pub trait Facts {
    /// Whether the caller presented a valid identity.
    fn is_authenticated(&self) -> bool;

    /// Whether the caller holds `role`.
    fn has_role(&self, role: &str) -> bool;

    /// Whether the caller owns the subject.
    fn is_owner(&self) -> bool;

    /// The subject's workflow state (e.g. `draft`, `published`).
    fn state(&self) -> &str;

    /// Whether the subject has never been saved.
    fn is_new(&self) -> bool;

    /// The subject's data at `path`, if present.
    fn field(&self, path: &str) -> Option<Value>;

    /// The request input named `name`, if present.
    fn input(&self, name: &str) -> Option<Value>;
}

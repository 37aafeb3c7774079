//! Leaf conditions that evaluate against [`Facts`].
//!
//! Each [`Condition`] variant checks a single fact about the caller or the
//! subject. Conditions are composed into expression trees via
//! [`Expr`](crate::Expr).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::facts::Facts;

/// A leaf condition that evaluates a single fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Condition {
    /// Matches every caller, signed in or not.
    Anyone,
    /// Matches if the caller presented a valid identity.
    Authenticated,
    /// Matches if the caller owns the subject.
    Owner,
    /// Matches if the caller holds any of the given roles.
    Role(Vec<String>),
    /// Matches if the subject's state is in the given list.
    State(Vec<String>),
    /// Matches if the subject has never been saved.
    IsNew,
    /// Matches if the subject field at `path` equals `value`.
    FieldEquals { path: String, value: Value },
    /// Matches if the subject field at `path` is present and non-empty.
    FieldPresent(String),
    /// Matches if the request input `name` is present and non-empty.
    InputPresent(String),
}

impl Condition {
    /// Evaluate this condition against the given facts.
    pub fn evaluate<F: Facts + ?Sized>(&self, facts: &F) -> bool {
        match self {
            Condition::Anyone => true,
            Condition::Authenticated => facts.is_authenticated(),
            Condition::Owner => facts.is_authenticated() && facts.is_owner(),
            Condition::Role(roles) => {
                facts.is_authenticated() && roles.iter().any(|r| facts.has_role(r))
            }
            Condition::State(states) => states.iter().any(|s| s == facts.state()),
            Condition::IsNew => facts.is_new(),
            Condition::FieldEquals { path, value } => facts.field(path).as_ref() == Some(value),
            Condition::FieldPresent(path) => facts.field(path).is_some_and(|v| !is_empty(&v)),
            Condition::InputPresent(name) => facts.input(name).is_some_and(|v| !is_empty(&v)),
        }
    }

    /// The subject field path this condition reads, if any.
    pub fn field_path(&self) -> Option<&str> {
        match self {
            Condition::FieldEquals { path, .. } | Condition::FieldPresent(path) => Some(path),
            _ => None,
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

//! Expression tree for composing [`Condition`] nodes.
//!
//! An [`Expr`] is a recursive enum that supports AND, OR, and NOT operations
//! over leaf conditions. Actions use one as their permission predicate and
//! the `if` step uses one as its branch test.
//!
//! `Serialize` and `Deserialize` are implemented manually (via
//! [`serde_json::Value`] as an intermediate) to avoid deep generic
//! monomorphization that the derive macro would produce for this recursive
//! type.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::condition::Condition;
use crate::facts::Facts;

/// A boolean expression tree over request facts.
///
/// JSON format (internally tagged with `"type"`):
///
/// ```json
/// { "type": "condition", "condition": {...} }  // leaf condition
/// { "type": "and", "exprs": [...] }
/// { "type": "or",  "exprs": [...] }
/// { "type": "not", "expr": {...} }
/// ```
///
/// Catalog authors may also write a leaf condition directly (`{"type":
/// "role", "value": ["editor"]}`) or, for conditions without arguments, as a
/// bare string (`"owner"`).
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A leaf condition.
    Condition(Condition),
    /// All sub-expressions must match.
    And(Vec<Expr>),
    /// At least one sub-expression must match.
    Or(Vec<Expr>),
    /// Negates the inner expression.
    Not(Box<Expr>),
}

impl Expr {
    /// An expression that always matches.
    pub fn always() -> Self {
        Expr::And(Vec::new())
    }

    /// Every subject field path referenced anywhere in the tree.
    pub fn field_paths(&self) -> Vec<&str> {
        let mut paths = Vec::new();
        self.collect_paths(&mut paths);
        paths
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Condition(cond) => out.extend(cond.field_path()),
            Expr::And(exprs) | Expr::Or(exprs) => {
                for e in exprs {
                    e.collect_paths(out);
                }
            }
            Expr::Not(inner) => inner.collect_paths(out),
        }
    }
}

impl Default for Expr {
    fn default() -> Self {
        Expr::always()
    }
}

impl From<Condition> for Expr {
    fn from(cond: Condition) -> Self {
        Expr::Condition(cond)
    }
}

// ---------------------------------------------------------------------------
// Manual Serialize / Deserialize via serde_json::Value
// ---------------------------------------------------------------------------

fn expr_to_value(expr: &Expr) -> Value {
    match expr {
        Expr::Condition(cond) => {
            let inner = serde_json::to_value(cond).unwrap_or(Value::Null);
            json!({ "type": "condition", "condition": inner })
        }
        Expr::And(exprs) => {
            let children: Vec<Value> = exprs.iter().map(expr_to_value).collect();
            json!({ "type": "and", "exprs": children })
        }
        Expr::Or(exprs) => {
            let children: Vec<Value> = exprs.iter().map(expr_to_value).collect();
            json!({ "type": "or", "exprs": children })
        }
        Expr::Not(inner) => json!({ "type": "not", "expr": expr_to_value(inner) }),
    }
}

fn expr_from_value(val: &Value) -> Result<Expr, String> {
    if let Value::String(name) = val {
        return parse_condition(&json!({ "type": name }));
    }

    let obj = val
        .as_object()
        .ok_or("expression must be a JSON object or a condition name")?;
    let type_tag = obj
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or("expression must have a \"type\" field")?;

    match type_tag {
        "condition" => {
            let cond_val = obj
                .get("condition")
                .ok_or("condition expr must have a \"condition\" field")?;
            parse_condition(cond_val)
        }
        "and" => Ok(Expr::And(children(obj, "and")?)),
        "or" => Ok(Expr::Or(children(obj, "or")?)),
        "not" => {
            let inner_val = obj
                .get("expr")
                .ok_or("not expr must have an \"expr\" field")?;
            Ok(Expr::Not(Box::new(expr_from_value(inner_val)?)))
        }
        _ => parse_condition(val),
    }
}

fn children(obj: &Map<String, Value>, tag: &str) -> Result<Vec<Expr>, String> {
    obj.get("exprs")
        .and_then(|v| v.as_array())
        .ok_or_else(|| format!("{tag} expr must have an \"exprs\" array"))?
        .iter()
        .map(expr_from_value)
        .collect()
}

fn parse_condition(val: &Value) -> Result<Expr, String> {
    serde_json::from_value::<Condition>(val.clone())
        .map(Expr::Condition)
        .map_err(|e| format!("invalid condition: {e}"))
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        expr_to_value(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        expr_from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// Evaluate an expression tree against the given facts.
pub fn evaluate<F: Facts + ?Sized>(expr: &Expr, facts: &F) -> bool {
    match expr {
        Expr::Condition(cond) => cond.evaluate(facts),
        Expr::And(exprs) => exprs.iter().all(|e| evaluate(e, facts)),
        Expr::Or(exprs) => exprs.iter().any(|e| evaluate(e, facts)),
        Expr::Not(inner) => !evaluate(inner, facts),
    }
}

//! Subject schemas and path-based field access.
//!
//! A [`Schema`] describes the typed fields of a subject's data document.
//! Mutation steps never write into the document directly: they go through
//! [`Schema::set`], which resolves a dotted path (`"title"`,
//! `"meta.summary"`, `"tags.0"`), coerces the incoming value to the declared
//! [`FieldType`], and enforces per-field constraints.
//!
//! Two failure kinds are kept apart:
//!
//! - [`Error::PathNotFound`] -- the path is not declared by the schema
//!   (an authoring defect in the step or template that named it).
//! - [`Error::Validation`] -- the path exists but the value is unacceptable
//!   (wrong type, not one of the allowed options, too long, missing).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Declared type of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    /// Accepts any JSON value unchanged.
    Any,
}

/// One field in a schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    #[serde(rename = "type")]
    pub kind: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Allowed string values; empty means unrestricted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Nested fields of an `object`; empty means any key is accepted.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Field>,
    /// Element description of an `array`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Field>>,
}

impl Field {
    /// A plain optional field of the given type.
    pub fn of(kind: FieldType) -> Self {
        Self {
            kind,
            required: false,
            options: Vec::new(),
            max_length: None,
            fields: BTreeMap::new(),
            items: None,
        }
    }

    /// Builder: mark the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Builder: restrict a string field to the given values.
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Coerce `value` to this field's type and check its constraints.
    ///
    /// `Null` is always accepted here; presence is checked by
    /// [`Schema::validate`].
    pub fn coerce(&self, path: &str, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        if self.kind != FieldType::String && value.as_str().is_some_and(|s| s.trim().is_empty()) {
            return Ok(Value::Null);
        }

        let coerced = match self.kind {
            FieldType::Any => value,
            FieldType::String => match value {
                Value::String(s) => Value::String(s),
                Value::Number(n) => Value::String(n.to_string()),
                Value::Bool(b) => Value::String(b.to_string()),
                other => return Err(type_error(path, "a string", &other)),
            },
            FieldType::Integer => {
                let parsed = match &value {
                    Value::Number(n) => n.as_i64().or_else(|| {
                        n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)
                    }),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                };
                parsed
                    .map(Value::from)
                    .ok_or_else(|| type_error(path, "an integer", &value))?
            }
            FieldType::Number => {
                let parsed = match &value {
                    Value::Number(n) => Some(n.clone()),
                    Value::String(s) => s
                        .trim()
                        .parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64),
                    _ => None,
                };
                parsed
                    .map(Value::Number)
                    .ok_or_else(|| type_error(path, "a number", &value))?
            }
            FieldType::Boolean => {
                let parsed = match &value {
                    Value::Bool(b) => Some(*b),
                    Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                        "true" | "on" | "yes" | "1" => Some(true),
                        "false" | "off" | "no" | "0" => Some(false),
                        _ => None,
                    },
                    Value::Number(n) => Some(n.as_f64().unwrap_or(0.0) != 0.0),
                    _ => None,
                };
                parsed
                    .map(Value::Bool)
                    .ok_or_else(|| type_error(path, "a boolean", &value))?
            }
            FieldType::Object => match value {
                Value::Object(map) => {
                    let mut out = Map::new();
                    for (key, v) in map {
                        let child_path = format!("{path}.{key}");
                        let child = self.child(&key).ok_or_else(|| {
                            Error::PathNotFound(child_path.clone())
                        })?;
                        out.insert(key, child.coerce(&child_path, v)?);
                    }
                    Value::Object(out)
                }
                other => return Err(type_error(path, "an object", &other)),
            },
            FieldType::Array => {
                let items = match value {
                    Value::Array(items) => items,
                    scalar => vec![scalar],
                };
                let item_field = self.items.as_deref().unwrap_or(&ANY_FIELD);
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    out.push(item_field.coerce(&format!("{path}.{i}"), item)?);
                }
                Value::Array(out)
            }
        };

        if let Value::String(s) = &coerced {
            if !self.options.is_empty() && !self.options.iter().any(|o| o == s) {
                return Err(Error::Validation(format!(
                    "{path} must be one of: {}",
                    self.options.join(", ")
                )));
            }
            if let Some(max) = self.max_length {
                if s.chars().count() > max {
                    return Err(Error::Validation(format!(
                        "{path} must be at most {max} characters"
                    )));
                }
            }
        }

        Ok(coerced)
    }

    /// Resolve one path segment below this field.
    fn child(&self, segment: &str) -> Option<&Field> {
        match self.kind {
            FieldType::Object if self.fields.is_empty() => Some(&ANY_FIELD),
            FieldType::Object => self.fields.get(segment),
            FieldType::Array if segment.parse::<usize>().is_ok() => {
                Some(self.items.as_deref().unwrap_or(&ANY_FIELD))
            }
            FieldType::Any => Some(&ANY_FIELD),
            _ => None,
        }
    }
}

/// Stand-in for positions the schema leaves open (untyped objects, `any`).
static ANY_FIELD: Field = Field {
    kind: FieldType::Any,
    required: false,
    options: Vec::new(),
    max_length: None,
    fields: BTreeMap::new(),
    items: None,
};

fn type_error(path: &str, expected: &str, got: &Value) -> Error {
    Error::Validation(format!("{path} must be {expected}, got {got}"))
}

/// The typed shape of a subject's data document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub fields: BTreeMap<String, Field>,
}

impl Schema {
    /// Builder: declare a top-level field.
    pub fn with_field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// Look up the field declared at `path`.
    pub fn field(&self, path: &str) -> Result<&Field> {
        let mut segments = path.split('.');
        let first = segments.next().unwrap_or_default();
        let mut field = self
            .fields
            .get(first)
            .ok_or_else(|| Error::PathNotFound(path.to_string()))?;
        for segment in segments {
            field = field
                .child(segment)
                .ok_or_else(|| Error::PathNotFound(path.to_string()))?;
        }
        Ok(field)
    }

    /// Whether `path` is declared by this schema.
    pub fn has_path(&self, path: &str) -> bool {
        self.field(path).is_ok()
    }

    /// Read the value at `path`, or `Null` when the document has none yet.
    pub fn get(&self, data: &Value, path: &str) -> Result<Value> {
        self.field(path)?;
        let mut cursor = data;
        for segment in path.split('.') {
            let next = match cursor {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(v) => cursor = v,
                None => return Ok(Value::Null),
            }
        }
        Ok(cursor.clone())
    }

    /// Coerce `value` for `path` without writing it anywhere.
    pub fn check(&self, path: &str, value: Value) -> Result<Value> {
        self.field(path)?.coerce(path, value)
    }

    /// Coerce and write `value` at `path`, creating intermediate objects.
    ///
    /// The document is untouched when coercion fails.
    pub fn set(&self, data: &mut Value, path: &str, value: Value) -> Result<()> {
        let value = self.check(path, value)?;

        if !data.is_object() {
            *data = Value::Object(Map::new());
        }

        let segments: Vec<&str> = path.split('.').collect();
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| Error::PathNotFound(path.to_string()))?;

        let mut cursor = data;
        for (i, segment) in parents.iter().enumerate() {
            let next_is_index = segments[i + 1].parse::<usize>().is_ok()
                && self
                    .field(&segments[..=i].join("."))
                    .is_ok_and(|f| f.kind == FieldType::Array);
            cursor = match cursor {
                Value::Object(map) => map.entry(segment.to_string()).or_insert_with(|| {
                    if next_is_index {
                        Value::Array(Vec::new())
                    } else {
                        Value::Object(Map::new())
                    }
                }),
                Value::Array(items) => {
                    let index = array_index(items, segment, path)?;
                    if index == items.len() {
                        items.push(Value::Object(Map::new()));
                    }
                    &mut items[index]
                }
                _ => {
                    return Err(Error::Validation(format!(
                        "{path}: {segment} is not a container"
                    )))
                }
            };
        }

        match cursor {
            Value::Object(map) => {
                map.insert(last.to_string(), value);
            }
            Value::Array(items) => {
                let index = array_index(items, last, path)?;
                if index == items.len() {
                    items.push(value);
                } else {
                    items[index] = value;
                }
            }
            _ => {
                return Err(Error::Validation(format!(
                    "{path}: parent is not a container"
                )))
            }
        }
        Ok(())
    }

    /// Check a whole document: every value coerces to its declared type and
    /// every required field is present.
    ///
    /// All problems are reported together in one [`Error::Validation`].
    pub fn validate(&self, data: &Value) -> Result<()> {
        let empty = Map::new();
        let map = data.as_object().unwrap_or(&empty);
        let mut problems = Vec::new();

        for (name, field) in &self.fields {
            match map.get(name) {
                None | Some(Value::Null) => {
                    if field.required {
                        problems.push(format!("{name} is required"));
                    }
                }
                Some(Value::String(s)) if field.required && s.trim().is_empty() => {
                    problems.push(format!("{name} is required"));
                }
                Some(value) => {
                    if let Err(e) = field.coerce(name, value.clone()) {
                        problems.push(match e {
                            Error::Validation(msg) => msg,
                            other => other.to_string(),
                        });
                    }
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(problems.join("; ")))
        }
    }

    /// Names of all required top-level fields.
    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, f)| f.required)
            .map(|(name, _)| name.as_str())
    }
}

fn array_index(items: &[Value], segment: &str, path: &str) -> Result<usize> {
    let index: usize = segment
        .parse()
        .map_err(|_| Error::PathNotFound(path.to_string()))?;
    if index > items.len() {
        return Err(Error::Validation(format!(
            "{path}: index {index} is past the end of the list"
        )));
    }
    Ok(index)
}

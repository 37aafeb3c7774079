//! The service locator handed to every renderer, and the collaborator
//! traits it bundles.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use ql_core::events::EventBus;
use ql_core::{Error, Result, Subject, SubjectId, UserId};
use serde::Serialize;
use serde_json::Value;

use crate::catalog::Catalog;
use crate::subject::{Criteria, StoredService, SubjectService, SubjectStore};

/// Token that asks for a freshly constructed subject instead of a load.
pub const NEW_TOKEN: &str = "new";

/// Turns a view model into markup.
pub trait TemplateEngine: Send + Sync {
    /// Render template `name`. A missing template is a configuration defect.
    fn render(&self, name: &str, model: &Value) -> Result<String>;
}

/// Awaited outbound calls made by integration steps.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// POST `body` as JSON to `url`; any failure is an [`Error::Integration`].
    async fn post_json(&self, url: &str, body: &Value) -> Result<()>;
}

/// Resolves an authenticated caller's account.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: UserId) -> Result<Option<CurrentUser>>;
}

/// The signed-in caller, resolved at most once per request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub username: String,
    pub roles: Vec<String>,
}

/// Everything a pipeline can reach besides the request itself.
pub struct Services {
    pub catalog: Arc<Catalog>,
    pub subjects: BTreeMap<String, Arc<dyn SubjectService>>,
    pub templates: Arc<dyn TemplateEngine>,
    pub outbound: Arc<dyn Outbound>,
    pub users: Arc<dyn UserDirectory>,
    /// Background task queue; publishing never waits.
    pub queue: Arc<EventBus>,
    pub max_delegation_depth: usize,
}

/// The collaborators [`Services::new`] wires around a catalog and store.
pub struct Collaborators {
    pub templates: Arc<dyn TemplateEngine>,
    pub outbound: Arc<dyn Outbound>,
    pub users: Arc<dyn UserDirectory>,
    pub queue: Arc<EventBus>,
    pub max_delegation_depth: usize,
}

impl Services {
    /// Build a [`StoredService`] over `store` for every content type in
    /// `catalog`.
    pub fn new(catalog: Arc<Catalog>, store: Arc<dyn SubjectStore>, with: Collaborators) -> Self {
        let subjects = catalog
            .content_types()
            .map(|ct| {
                let service: Arc<dyn SubjectService> =
                    Arc::new(StoredService::new(ct, store.clone()));
                (ct.name.clone(), service)
            })
            .collect();
        Self {
            catalog,
            subjects,
            templates: with.templates,
            outbound: with.outbound,
            users: with.users,
            queue: with.queue,
            max_delegation_depth: with.max_delegation_depth,
        }
    }

    /// The persistence service for `content_type`.
    pub fn service_for(&self, content_type: &str) -> Result<Arc<dyn SubjectService>> {
        self.subjects.get(content_type).cloned().ok_or_else(|| {
            Error::Configuration(format!("no subject service for content type '{content_type}'"))
        })
    }

    /// Resolve a URL token to a subject of `content_type`.
    ///
    /// [`NEW_TOKEN`] constructs a fresh subject owned by `owner`; anything
    /// else must name a live subject of that type.
    pub async fn resolve(
        &self,
        content_type: &str,
        token: &str,
        owner: Option<UserId>,
    ) -> Result<Subject> {
        if self.catalog.content_type(content_type).is_none() {
            return Err(Error::not_found("content type", content_type));
        }
        let service = self.service_for(content_type)?;
        if token == NEW_TOKEN {
            let mut subject = service.new_subject();
            subject.owner_id = owner;
            return Ok(subject);
        }
        let id: SubjectId = token
            .parse()
            .map_err(|_| Error::not_found(content_type, token))?;
        service.load(Criteria::live(id)).await
    }
}

// ---------------------------------------------------------------------------
// TemplateSet
// ---------------------------------------------------------------------------

/// Named templates with `{{path}}` placeholders.
///
/// `{{subject.data.title}}` inserts the HTML-escaped value at that dotted
/// path of the view model; `{{{body}}}` inserts it unescaped. Missing values
/// render as nothing; non-string values render as JSON.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: BTreeMap<String, String>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(name, source);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateEngine for TemplateSet {
    fn render(&self, name: &str, model: &Value) -> Result<String> {
        let source = self
            .templates
            .get(name)
            .ok_or_else(|| Error::Configuration(format!("template '{name}' not found")))?;
        Ok(substitute(source, model))
    }
}

fn substitute(source: &str, model: &Value) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let (raw, open, close) = if after.starts_with("{{{") {
            (true, 3, "}}}")
        } else {
            (false, 2, "}}")
        };
        let Some(end) = after[open..].find(close) else {
            out.push_str(after);
            return out;
        };
        let path = after[open..open + end].trim();
        let text = match lookup(model, path) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        if raw {
            out.push_str(&text);
        } else {
            escape_into(&mut out, &text);
        }
        rest = &after[open + end + close.len()..];
    }
    out.push_str(rest);
    out
}

fn lookup<'a>(model: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(model, |cursor, segment| match cursor {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

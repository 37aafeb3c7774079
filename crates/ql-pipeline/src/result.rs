//! The control-flow and side-effect record produced by a pipeline run.
//!
//! A [`PipelineResult`] is an immutable value. Steps return fresh results
//! and the executor folds them together with [`PipelineResult::merge`], a
//! pure function: boolean flags are OR-ed, scalar fields take the most
//! recent non-empty value, and header/event maps are unioned with the right
//! operand winning on key collisions. A merged result that carries an error
//! is always halted, whatever its operands said. [`PipelineResult::ok`] is
//! the identity of `merge` for every result the constructors build, which is
//! what lets nested delegation results fold into the outer run without
//! special cases.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ql_core::Error;

#[derive(Clone, Default)]
pub struct PipelineResult {
    /// Status code override; `None` lets the transport pick.
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    /// Client-visible signals, name to payload.
    pub events: BTreeMap<String, String>,
    /// The body must not be wrapped in the surrounding page chrome.
    pub full_page: bool,
    /// No further step of the current pipeline (or any enclosing one) runs.
    pub halt: bool,
    pub error: Option<Arc<Error>>,
}

impl PipelineResult {
    /// The neutral result: continue, no side effects.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Stop the pipeline without an error.
    pub fn halt() -> Self {
        Self {
            halt: true,
            ..Self::default()
        }
    }

    /// Stop the pipeline with `error`.
    pub fn error(error: Error) -> Self {
        Self {
            halt: true,
            error: Some(Arc::new(error)),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// An empty content type leaves the field unset.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        let content_type = content_type.into();
        self.content_type = (!content_type.is_empty()).then_some(content_type);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_event(mut self, name: impl Into<String>, payload: impl Into<String>) -> Self {
        self.events.insert(name.into(), payload.into());
        self
    }

    pub fn with_full_page(mut self) -> Self {
        self.full_page = true;
        self
    }

    pub fn with_halt(mut self) -> Self {
        self.halt = true;
        self
    }

    /// Fold `later` into `self`.
    pub fn merge(self, later: PipelineResult) -> PipelineResult {
        let mut headers = self.headers;
        headers.extend(later.headers);
        let mut events = self.events;
        events.extend(later.events);
        let error = later.error.or(self.error);

        PipelineResult {
            status: later.status.or(self.status),
            content_type: later
                .content_type
                .filter(|ct| !ct.is_empty())
                .or(self.content_type),
            headers,
            events,
            full_page: self.full_page || later.full_page,
            halt: self.halt || later.halt || error.is_some(),
            error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Free-function form of [`PipelineResult::merge`].
pub fn merge(a: PipelineResult, b: PipelineResult) -> PipelineResult {
    a.merge(b)
}

impl fmt::Debug for PipelineResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineResult")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("headers", &self.headers)
            .field("events", &self.events)
            .field("full_page", &self.full_page)
            .field("halt", &self.halt)
            .field("error", &self.error.as_ref().map(|e| e.to_string()))
            .finish()
    }
}

/// Errors compare by kind and message.
impl PartialEq for PipelineResult {
    fn eq(&self, other: &Self) -> bool {
        let same_error = match (&self.error, &other.error) {
            (None, None) => true,
            (Some(a), Some(b)) => a.kind() == b.kind() && a.to_string() == b.to_string(),
            _ => false,
        };
        same_error
            && self.status == other.status
            && self.content_type == other.content_type
            && self.headers == other.headers
            && self.events == other.events
            && self.full_page == other.full_page
            && self.halt == other.halt
    }
}

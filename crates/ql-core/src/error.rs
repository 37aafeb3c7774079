//! Unified error type for quill.
//!
//! All crates funnel their failures into [`Error`]. Every variant belongs to
//! exactly one [`ErrorKind`] of the public taxonomy; the pipeline wraps step
//! failures in [`Error::Step`] to record where they happened, and
//! [`Error::kind`] looks through that wrapper so the kind is never
//! reinterpreted on the way up. API handlers derive an HTTP status code via
//! [`Error::http_status`].

use std::fmt;

/// The error taxonomy exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input failed the Subject's schema.
    Validation,
    /// The caller has no identity and the operation requires one.
    Unauthorized,
    /// The caller is identified but lacks the required rights.
    Forbidden,
    /// The target or a related entity is missing.
    NotFound,
    /// Deployment or authoring defect (unresolvable action, unknown step, bad path).
    Configuration,
    /// The storage collaborator failed or rejected a write.
    Persistence,
    /// An external service collaborator failed.
    Integration,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable code used in API error bodies.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Configuration => "configuration_error",
            ErrorKind::Persistence => "persistence_error",
            ErrorKind::Integration => "integration_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

/// Unified error type covering all failure modes in quill.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "subject", "action").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The caller is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The caller lacks permission for the requested action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A field path does not exist in the subject's schema.
    #[error("Unknown field path: {0}")]
    PathNotFound(String),

    /// The action catalog or a step configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A write was rejected because the stored revision moved on.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A persistence operation failed.
    #[error("Persistence error: {source}")]
    Persistence {
        /// The underlying storage error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external service returned an error.
    #[error("Integration error [{service}]: {message}")]
    Integration {
        /// Name or address of the service that failed.
        service: String,
        /// Human-readable error description.
        message: String,
    },

    /// A pipeline step failed.
    #[error("{location} [{step}]: {source}")]
    Step {
        /// The step kind that failed.
        step: String,
        /// Where the step sits, e.g. `post/view/steps[2]`.
        location: String,
        /// The error the step produced.
        source: Box<Error>,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The taxonomy kind of this error, looking through step wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::Validation(_) => ErrorKind::Validation,
            Error::PathNotFound(_) | Error::Configuration(_) => ErrorKind::Configuration,
            Error::Conflict(_) | Error::Persistence { .. } => ErrorKind::Persistence,
            Error::Integration { .. } => ErrorKind::Integration,
            Error::Io { .. } | Error::Internal(_) => ErrorKind::Internal,
            Error::Step { source, .. } => source.kind(),
        }
    }

    /// The innermost error, with all step wrappers removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self.root() {
            Error::NotFound { .. } => 404,
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::Validation(_) => 400,
            Error::PathNotFound(_) => 400,
            Error::Configuration(_) => 400,
            Error::Conflict(_) => 409,
            Error::Persistence { .. } => 500,
            Error::Io { .. } => 500,
            Error::Integration { .. } => 502,
            Error::Internal(_) => 500,
            Error::Step { .. } => 500,
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Persistence`].
    pub fn persistence(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Persistence {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::Integration`].
    pub fn integration(service: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Integration {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Wrap this error with the identity and location of the failing step.
    pub fn in_step(self, step: impl Into<String>, location: impl Into<String>) -> Self {
        Error::Step {
            step: step.into(),
            location: location.into(),
            source: Box::new(self),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`ql_core::Error`] so that route handlers
//! can return `Result<T, AppError>` and still carry the request id.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ql_core::ErrorKind;
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
pub struct AppError {
    inner: Arc<ql_core::Error>,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: ql_core::Error) -> Self {
        Self::shared(Arc::new(inner))
    }

    /// Wrap an error already shared by a pipeline result.
    pub fn shared(inner: Arc<ql_core::Error>) -> Self {
        Self {
            inner,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: String) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn error(&self) -> &ql_core::Error {
        &self.inner
    }
}

impl From<ql_core::Error> for AppError {
    fn from(e: ql_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let kind = self.inner.kind();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                request_id = self.request_id.as_deref().unwrap_or("-"),
                "Server error in request handler"
            );
        } else if kind == ErrorKind::Configuration {
            // Authoring defects surface as 400s but still need an operator.
            tracing::error!(
                error = %self.inner,
                request_id = self.request_id.as_deref().unwrap_or("-"),
                "Configuration error in request handler"
            );
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": kind.code(),
            "request_id": self.request_id,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_produces_404() {
        let err = AppError::new(ql_core::Error::not_found("post", "abc"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unauthorized_produces_401() {
        let err = AppError::new(ql_core::Error::Unauthorized("sign in".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn step_errors_keep_their_kind_status() {
        let inner = ql_core::Error::Validation("title is required".into())
            .in_step("validate-input", "post/publish/steps[0]");
        let response = AppError::new(inner).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn with_request_id() {
        let err = AppError::new(ql_core::Error::Internal("oops".into()))
            .with_request_id("req-123".into());
        assert_eq!(err.request_id.as_deref(), Some("req-123"));
    }
}

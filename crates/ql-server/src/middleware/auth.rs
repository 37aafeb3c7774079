//! Caller resolution middleware.
//!
//! Resolves a session token from `Authorization: Bearer <token>` or the
//! session cookie and injects the [`Caller`] into request extensions. A
//! missing, unknown or expired token is not rejected here: anonymous callers
//! still reach pipelines, whose permits decide between 401 and 403.

use axum::extract::State;
use axum::http::{header, HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use ql_core::UserId;
use ql_db::pool::DbPool;

use crate::context::AppContext;

/// The resolved caller of a request; `None` is anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct Caller(pub Option<UserId>);

/// Extract a session token from the Authorization header or the cookie
/// named `cookie_name`. The header wins when both are present.
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(token.trim().to_string());
    }

    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    let prefix = format!("{cookie_name}=");
    cookies
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix(prefix.as_str()))
        .map(str::to_string)
}

/// Look `token` up and return its user if it has not expired.
pub fn validate_token(db: &DbPool, token: &str) -> Option<UserId> {
    let conn = ql_db::pool::get_conn(db).ok()?;
    let stored = ql_db::queries::auth::get_token(&conn, token).ok()??;
    let expires_at = DateTime::parse_from_rfc3339(&stored.expires_at).ok()?;
    if expires_at.with_timezone(&Utc) <= Utc::now() {
        tracing::debug!(user_id = %stored.user_id, "Session token expired");
        return None;
    }
    Some(stored.user_id)
}

/// Resolve the caller and insert [`Caller`] into request extensions.
pub async fn auth_middleware(
    State(ctx): State<AppContext>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let user_id = extract_token(request.headers(), &ctx.config.auth.cookie_name)
        .and_then(|token| validate_token(&ctx.db, &token));

    request.extensions_mut().insert(Caller(user_id));
    next.run(request).await
}

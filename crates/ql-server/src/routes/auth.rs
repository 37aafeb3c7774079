//! Authentication route handlers: login, logout, status.

use axum::extract::{Extension, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::auth::{extract_token, Caller};

/// Login request payload.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login/logout response.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Auth status response.
#[derive(Debug, Serialize)]
pub struct AuthStatusResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

fn session_cookie(name: &str, token: &str, max_age_secs: i64) -> String {
    format!("{name}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}")
}

/// POST /auth/login
pub async fn login(
    State(ctx): State<AppContext>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let conn = ql_db::pool::get_conn(&ctx.db)?;

    let user = ql_db::queries::users::get_user_by_username(&conn, &payload.username)?
        .ok_or_else(|| ql_core::Error::Unauthorized("Invalid credentials".into()))?;

    let password_valid = bcrypt::verify(&payload.password, &user.password_hash).unwrap_or(false);
    if !password_valid {
        tracing::info!(username = %payload.username, "Login rejected");
        return Err(ql_core::Error::Unauthorized("Invalid credentials".into()).into());
    }

    let now = Utc::now();
    let purged = ql_db::queries::auth::delete_expired_tokens(&conn, &now.to_rfc3339())?;
    if purged > 0 {
        tracing::debug!(purged, "Expired session tokens removed");
    }

    let timeout = Duration::hours(ctx.config.auth.session_timeout_hours as i64);
    let token = uuid::Uuid::new_v4().to_string();
    let expires = now + timeout;
    ql_db::queries::auth::create_token(&conn, user.id, &token, &expires.to_rfc3339())?;

    tracing::info!(user_id = %user.id, username = %user.username, "Login successful");

    let cookie = session_cookie(&ctx.config.auth.cookie_name, &token, timeout.num_seconds());
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            success: true,
            message: "Login successful".into(),
            token: Some(token),
        }),
    ))
}

/// POST /auth/logout
pub async fn logout(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    if let Some(token) = extract_token(&headers, &ctx.config.auth.cookie_name) {
        let conn = ql_db::pool::get_conn(&ctx.db)?;
        ql_db::queries::auth::delete_token(&conn, &token)?;
    }

    let cookie = session_cookie(&ctx.config.auth.cookie_name, "", 0);
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            success: true,
            message: "Logged out".into(),
            token: None,
        }),
    ))
}

/// GET /auth/status
pub async fn auth_status(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<AuthStatusResponse>, AppError> {
    let Caller(Some(user_id)) = caller else {
        return Ok(Json(AuthStatusResponse {
            authenticated: false,
            user_id: None,
            username: None,
            roles: Vec::new(),
        }));
    };

    let conn = ql_db::pool::get_conn(&ctx.db)?;
    let user = ql_db::queries::users::get_user_by_id(&conn, user_id)?;
    Ok(Json(AuthStatusResponse {
        authenticated: user.is_some(),
        user_id: Some(user_id.to_string()),
        username: user.as_ref().map(|u| u.username.clone()),
        roles: user.map(|u| u.roles).unwrap_or_default(),
    }))
}

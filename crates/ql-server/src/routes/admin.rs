//! Operator endpoints.

use axum::extract::{Extension, State};
use axum::Json;
use serde::Serialize;

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::auth::Caller;
use crate::middleware::request_id::RequestId;

/// Role allowed to reload the catalog.
pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub content_types: usize,
    pub actions: usize,
}

/// POST /admin/reload -- re-read the catalog and templates from disk.
pub async fn reload(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Extension(RequestId(request_id)): Extension<RequestId>,
) -> Result<Json<ReloadResponse>, AppError> {
    let fail = |e: ql_core::Error| AppError::new(e).with_request_id(request_id.clone());

    let Caller(Some(user_id)) = caller else {
        return Err(fail(ql_core::Error::Unauthorized("sign in to reload".into())));
    };
    let conn = ql_db::pool::get_conn(&ctx.db).map_err(fail)?;
    let user = ql_db::queries::users::get_user_by_id(&conn, user_id).map_err(fail)?;
    if !user.is_some_and(|u| u.roles.iter().any(|r| r == ADMIN_ROLE)) {
        return Err(fail(ql_core::Error::Forbidden("admin role required".into())));
    }

    let services = ctx.config_store.reload().map_err(fail)?;
    Ok(Json(ReloadResponse {
        content_types: services.catalog.content_types().count(),
        actions: services.catalog.action_count(),
    }))
}

//! Axum router construction.
//!
//! Builds the application router: fixed routes for health, auth, events and
//! admin, the catch-all action routes, and the middleware layers.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::middleware::auth::auth_middleware;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/logout", post(routes::auth::logout))
        .route("/auth/status", get(routes::auth::auth_status));

    // Static segments take priority over the `{content_type}` captures.
    let action_routes = Router::new()
        .route(
            "/{content_type}/{token}",
            get(routes::actions::default_action).post(routes::actions::default_action),
        )
        .route(
            "/{content_type}/{token}/{action}",
            get(routes::actions::named_action).post(routes::actions::named_action),
        );

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/events", get(routes::events::events_handler))
        .route("/admin/reload", post(routes::admin::reload))
        .merge(auth_routes)
        .merge(action_routes)
        // Caller resolution never rejects; permits decide per action.
        .layer(middleware::from_fn_with_state(ctx.clone(), auth_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use ql_core::config::Config;
    use ql_db::pool::init_memory_pool;
    use tower::ServiceExt;

    fn router() -> Router {
        let ctx = AppContext::new(Config::default(), None, init_memory_pool().unwrap()).unwrap();
        build_router(ctx)
    }

    #[tokio::test]
    async fn health_is_ok_with_request_id() {
        let response = router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn unknown_content_type_is_404() {
        let response = router()
            .oneshot(Request::get("/nothing/new").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn anonymous_status_is_unauthenticated() {
        let response = router()
            .oneshot(Request::get("/auth/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn events_require_sign_in() {
        let response = router()
            .oneshot(Request::get("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

//! Action dispatch: `/{content_type}/{token}[/{action}]`.
//!
//! Resolves the URL token to a subject, runs the named action through the
//! pipeline engine, and turns the folded [`PipelineResult`] into an HTTP
//! response:
//!
//! - an error becomes the JSON error body with its kind's status;
//! - `status`, `content_type` and `headers` are applied as given;
//! - events are sent as a JSON object in `HX-Trigger`;
//! - outside htmx, an `HX-Redirect` becomes a `303 See Other` and partial
//!   HTML is wrapped in the configured layout template.

use std::sync::Arc;

use axum::extract::{Extension, FromRequest, Path, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use ql_core::{Error, Result};
use ql_pipeline::steps::REDIRECT_HEADER;
use ql_pipeline::{execute, Outcome, RequestState, Services, Verb};

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::auth::Caller;
use crate::middleware::request_id::RequestId;

/// Action run when the URL names none.
pub const DEFAULT_ACTION: &str = "view";

/// Header htmx sets on its own requests.
pub const HX_REQUEST: &str = "hx-request";
/// Header carrying client-visible events.
pub const HX_TRIGGER: &str = "hx-trigger";

const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

#[derive(Debug, Deserialize)]
pub struct SubjectPath {
    pub content_type: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ActionPath {
    pub content_type: String,
    pub token: String,
    pub action: String,
}

/// GET|POST /{content_type}/{token}
pub async fn default_action(
    State(ctx): State<AppContext>,
    Path(path): Path<SubjectPath>,
    Extension(caller): Extension<Caller>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Query(query): Query<Vec<(String, String)>>,
    request: Request,
) -> Response {
    let target = ActionPath {
        content_type: path.content_type,
        token: path.token,
        action: DEFAULT_ACTION.to_string(),
    };
    dispatch(ctx, target, caller, request_id, query, request).await
}

/// GET|POST /{content_type}/{token}/{action}
pub async fn named_action(
    State(ctx): State<AppContext>,
    Path(path): Path<ActionPath>,
    Extension(caller): Extension<Caller>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Query(query): Query<Vec<(String, String)>>,
    request: Request,
) -> Response {
    dispatch(ctx, path, caller, request_id, query, request).await
}

async fn dispatch(
    ctx: AppContext,
    target: ActionPath,
    Caller(user_id): Caller,
    request_id: String,
    query: Vec<(String, String)>,
    request: Request,
) -> Response {
    let fail = |e: Error| AppError::new(e).with_request_id(request_id.clone()).into_response();

    let verb = verb_for(request.method());
    let htmx = is_htmx(request.headers());
    let input = match verb {
        Verb::Get => Map::new(),
        Verb::Post => match read_input(request).await {
            Ok(input) => input,
            Err(e) => return fail(e),
        },
    };

    let services = ctx.config_store.services();
    let subject = match services
        .resolve(&target.content_type, &target.token, user_id)
        .await
    {
        Ok(subject) => subject,
        Err(e) => return fail(e),
    };

    let state = RequestState::new(verb, user_id)
        .with_input(input)
        .with_query(collect_pairs(query))
        .with_request_id(request_id.clone());
    let outcome = execute(services.clone(), Arc::new(state), subject, &target.action).await;

    let layout = if htmx { None } else { ctx.config_store.layout() };
    match render_outcome(&services, outcome, htmx, layout.as_deref()) {
        Ok(response) => response,
        Err(e) => AppError::shared(e).with_request_id(request_id).into_response(),
    }
}

fn verb_for(method: &Method) -> Verb {
    Verb::from_method(method.as_str())
}

fn is_htmx(headers: &HeaderMap) -> bool {
    headers
        .get(HX_REQUEST)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Decode a JSON or form body into the pipeline's input map. Other bodies
/// are ignored.
async fn read_input(request: Request) -> Result<Map<String, Value>> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.starts_with("application/json") {
        let Json(value) = Json::<Value>::from_request(request, &())
            .await
            .map_err(|e| Error::Validation(format!("invalid JSON body: {}", e.body_text())))?;
        match value {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            _ => Err(Error::Validation("request body must be a JSON object".into())),
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(pairs) = Form::<Vec<(String, String)>>::from_request(request, &())
            .await
            .map_err(|e| Error::Validation(format!("invalid form body: {}", e.body_text())))?;
        Ok(collect_pairs(pairs))
    } else {
        Ok(Map::new())
    }
}

/// Fold `key=value` pairs into a map; repeated keys become arrays.
fn collect_pairs(pairs: Vec<(String, String)>) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            None => {
                map.insert(key, Value::String(value));
            }
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
        }
    }
    map
}

fn render_outcome(
    services: &Services,
    outcome: Outcome,
    htmx: bool,
    layout: Option<&str>,
) -> std::result::Result<Response, Arc<Error>> {
    let Outcome {
        result,
        body,
        subject,
    } = outcome;
    if let Some(error) = result.error {
        return Err(error);
    }

    if !htmx {
        if let Some(location) = result.headers.get(REDIRECT_HEADER) {
            return Ok((StatusCode::SEE_OTHER, [(header::LOCATION, location.clone())]).into_response());
        }
    }

    let status = result
        .status
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::OK);
    let content_type = result
        .content_type
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    let body = match layout {
        Some(layout) if !result.full_page && content_type.starts_with("text/html") => {
            let model = layout_model(services, subject.as_ref(), &body);
            services.templates.render(layout, &model).map_err(Arc::new)?
        }
        _ => body,
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    for (name, value) in &result.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Dropping invalid response header"),
        }
    }
    if !result.events.is_empty() {
        let trigger = serde_json::to_string(&result.events)
            .map_err(|e| Arc::new(Error::Internal(format!("cannot encode events: {e}"))))?;
        if let Ok(value) = HeaderValue::from_str(&trigger) {
            headers.insert(HX_TRIGGER, value);
        }
    }

    Ok((status, headers, body).into_response())
}

/// The document the layout template is rendered against.
fn layout_model(services: &Services, subject: Option<&ql_core::Subject>, body: &str) -> Value {
    let content_type = subject.and_then(|s| services.catalog.content_type(&s.content_type));
    let title = match (subject, content_type) {
        (Some(s), Some(ct)) => ct
            .title_field
            .as_deref()
            .and_then(|path| ct.schema.get(&s.data, path).ok())
            .and_then(|v| v.as_str().map(str::to_owned))
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| ct.name.clone()),
        _ => String::new(),
    };
    json!({
        "body": body,
        "title": title,
        "group": content_type.and_then(|ct| ct.group.clone()),
        "subject": subject,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_pairs_become_arrays() {
        let map = collect_pairs(vec![
            ("order".into(), "a".into()),
            ("title".into(), "Hi".into()),
            ("order".into(), "b".into()),
            ("order".into(), "c".into()),
        ]);
        assert_eq!(map["title"], json!("Hi"));
        assert_eq!(map["order"], json!(["a", "b", "c"]));
    }

    #[test]
    fn head_reads_and_put_writes() {
        assert_eq!(verb_for(&Method::HEAD), Verb::Get);
        assert_eq!(verb_for(&Method::POST), Verb::Post);
        assert_eq!(verb_for(&Method::PUT), Verb::Post);
    }

    #[test]
    fn htmx_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_htmx(&headers));
        headers.insert(HX_REQUEST, HeaderValue::from_static("true"));
        assert!(is_htmx(&headers));
    }
}

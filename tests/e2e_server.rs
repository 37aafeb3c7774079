//! Server end-to-end tests
//!
//! Drives the action routes over real HTTP: authorization, validation,
//! persistence, delegation and the translation of pipeline results into
//! responses.

mod common;

use common::TestHarness;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn health_reports_loaded_catalog() {
    let h = TestHarness::start().await;
    let resp = h.get("/health", None).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["content_types"], 2);
}

#[tokio::test]
async fn anonymous_create_is_unauthorized() {
    let h = TestHarness::start().await;
    let resp = h
        .post_json("/post/new/create", None, json!({"title": "Nope"}))
        .await;
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "unauthorized");
    assert!(body["request_id"].is_string());
}

#[tokio::test]
async fn create_then_view_in_layout() {
    let h = TestHarness::start().await;
    let token = h.signed_in("ann", &[]).await;

    let created = h.create_post(&token, "Hello <world>").await;
    assert_eq!(created["revision"], 1);
    assert_eq!(created["data"]["status"], "draft");
    let id = created["id"].as_str().unwrap();

    let resp = h.get(&format!("/post/{id}"), None).await;
    assert_eq!(resp.status(), 200);
    let html = resp.text().await.unwrap();
    assert!(html.starts_with("<html>"), "got: {html}");
    assert!(html.contains("<title>Hello &lt;world&gt;</title>"), "got: {html}");
    assert!(html.contains("data-group=\"Blog\""), "got: {html}");
    assert!(html.contains("<h1>Hello &lt;world&gt;</h1>"), "got: {html}");
}

#[tokio::test]
async fn htmx_requests_get_the_bare_fragment() {
    let h = TestHarness::start().await;
    let token = h.signed_in("ann", &[]).await;
    let created = h.create_post(&token, "Fragment").await;
    let id = created["id"].as_str().unwrap();

    let resp = h
        .client
        .get(h.url(&format!("/post/{id}")))
        .header("HX-Request", "true")
        .send()
        .await
        .unwrap();
    let html = resp.text().await.unwrap();
    assert!(html.starts_with("<article>"), "got: {html}");
}

#[tokio::test]
async fn create_without_title_is_a_validation_error() {
    let h = TestHarness::start().await;
    let token = h.signed_in("ann", &[]).await;

    let resp = h
        .post_json("/post/new/create", Some(&token), json!({"body": "no title"}))
        .await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "validation_error");
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("title is required"), "got: {message}");
    assert!(message.contains("post/create/steps[0]"), "got: {message}");
}

#[tokio::test]
async fn form_bodies_are_accepted() {
    let h = TestHarness::start().await;
    let token = h.signed_in("ann", &[]).await;

    let resp = h
        .client
        .post(h.url("/post/new/create"))
        .bearer_auth(&token)
        .form(&[("title", "From a form"), ("body", "text")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["data"]["title"], "From a form");
}

#[tokio::test]
async fn events_travel_in_hx_trigger() {
    let h = TestHarness::start().await;
    let token = h.signed_in("ann", &[]).await;
    let created = h.create_post(&token, "Draft").await;
    let id = created["id"].as_str().unwrap();

    let resp = h
        .client
        .post(h.url(&format!("/post/{id}/edit")))
        .bearer_auth(&token)
        .header("HX-Request", "true")
        .json(&json!({"title": "Edited"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let trigger = resp.headers()["hx-trigger"].to_str().unwrap().to_string();
    let events: Value = serde_json::from_str(&trigger).unwrap();
    assert_eq!(events["postSaved"], "true");
    assert_eq!(events["closeModal"], "true");

    let json: Value = h
        .get(&format!("/post/{id}/json"), None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(json["data"]["title"], "Edited");
    assert_eq!(json["revision"], 2);
}

#[tokio::test]
async fn other_users_are_forbidden() {
    let h = TestHarness::start().await;
    let ann = h.signed_in("ann", &[]).await;
    let bob = h.signed_in("bob", &[]).await;
    let created = h.create_post(&ann, "Ann's").await;
    let id = created["id"].as_str().unwrap();

    let resp = h
        .post_json(&format!("/post/{id}/edit"), Some(&bob), json!({"title": "Bob's"}))
        .await;
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "forbidden");

    let anonymous = h
        .post_json(&format!("/post/{id}/edit"), None, json!({"title": "Nobody's"}))
        .await;
    assert_eq!(anonymous.status(), 401);
}

#[tokio::test]
async fn redirects_become_see_other_outside_htmx() {
    let h = TestHarness::start().await;
    let token = h.signed_in("ann", &[]).await;
    let created = h.create_post(&token, "Going live").await;
    let id = created["id"].as_str().unwrap();

    let resp = h
        .post_json(&format!("/post/{id}/publish"), Some(&token), json!({}))
        .await;
    assert_eq!(resp.status(), 303);
    assert_eq!(resp.headers()["location"], format!("/post/{id}").as_str());

    let html = h.get(&format!("/post/{id}"), None).await.text().await.unwrap();
    assert!(html.contains("<p class=\"state\">published</p>"), "got: {html}");
}

#[tokio::test]
async fn child_creation_and_listing() {
    let h = TestHarness::start().await;
    let token = h.signed_in("ann", &[]).await;
    let created = h.create_post(&token, "With comments").await;
    let id = created["id"].as_str().unwrap();

    for text in ["first", "second"] {
        let resp = h
            .client
            .post(h.url(&format!("/post/{id}/add-comment")))
            .bearer_auth(&token)
            .header("HX-Request", "true")
            .json(&json!({"text": text}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers()["hx-redirect"],
            format!("/post/{id}/comments").as_str()
        );
    }

    let html = h
        .client
        .get(h.url(&format!("/post/{id}/comments")))
        .header("HX-Request", "true")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(html.matches("<li>").count(), 2, "got: {html}");
    assert!(html.find("first").unwrap() < html.find("second").unwrap());

    let invalid = h
        .post_json(&format!("/post/{id}/add-comment"), Some(&token), json!({}))
        .await;
    assert_eq!(invalid.status(), 400);
}

#[tokio::test]
async fn resolution_failures() {
    let h = TestHarness::start().await;
    let token = h.signed_in("ann", &[]).await;
    let created = h.create_post(&token, "Here").await;
    let id = created["id"].as_str().unwrap();

    let unknown_action = h.get(&format!("/post/{id}/nope"), None).await;
    assert_eq!(unknown_action.status(), 400);
    let body: Value = unknown_action.json().await.unwrap();
    assert_eq!(body["code"], "configuration_error");

    let unknown_id = h.get("/post/00000000-0000-0000-0000-000000000000", None).await;
    assert_eq!(unknown_id.status(), 404);

    let garbage_id = h.get("/post/not-an-id", None).await;
    assert_eq!(garbage_id.status(), 404);

    let unknown_type = h.get("/page/new", None).await;
    assert_eq!(unknown_type.status(), 404);
}

#[tokio::test]
async fn status_and_headers_pass_through() {
    let h = TestHarness::start().await;
    let resp = h.get("/post/new/ping", None).await;
    assert_eq!(resp.status(), 202);
    assert_eq!(resp.headers()["x-quill"], "pong");
}

#[tokio::test]
async fn webhook_step_delivers_and_queues_notification() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/announce"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = TestHarness::with_hook_url(&server.uri()).await;
    let token = h.signed_in("ann", &[]).await;
    let created = h.create_post(&token, "Big news").await;
    let id = created["id"].as_str().unwrap();

    let resp = h
        .post_json(&format!("/post/{id}/announce"), Some(&token), json!({}))
        .await;
    assert_eq!(resp.status(), 200);

    let received = server.received_requests().await.unwrap();
    let payload: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(payload["event"], "announced");
    assert_eq!(payload["subject"]["data"]["title"], "Big news");

    let recent = h.ctx.event_bus.recent_events(10);
    assert!(recent
        .iter()
        .any(|e| e.payload.event_type() == "notification"));
}

#[tokio::test]
async fn failing_webhook_is_an_integration_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let h = TestHarness::with_hook_url(&server.uri()).await;
    let token = h.signed_in("ann", &[]).await;
    let created = h.create_post(&token, "Bad news").await;
    let id = created["id"].as_str().unwrap();

    let resp = h
        .post_json(&format!("/post/{id}/announce"), Some(&token), json!({}))
        .await;
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "integration_error");

    // Nothing after the failing step ran.
    let recent = h.ctx.event_bus.recent_events(10);
    assert!(!recent
        .iter()
        .any(|e| e.payload.event_type() == "notification"));
}

#[tokio::test]
async fn saves_are_broadcast() {
    let h = TestHarness::start().await;
    let token = h.signed_in("ann", &[]).await;
    let mut rx = h.ctx.event_bus.subscribe();

    h.create_post(&token, "Broadcast").await;

    let event = rx.recv().await.unwrap();
    assert_eq!(event.payload.event_type(), "subject_saved");
}

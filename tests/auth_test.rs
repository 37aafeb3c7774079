//! Session login, logout and caller resolution over HTTP.

mod common;

use chrono::{Duration, Utc};
use common::TestHarness;
use serde_json::{json, Value};

#[tokio::test]
async fn wrong_password_is_rejected() {
    let h = TestHarness::start().await;
    h.create_user("ann", "right-password", &[]);

    let resp = h
        .client
        .post(h.url("/auth/login"))
        .json(&json!({"username": "ann", "password": "wrong"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let unknown = h
        .client
        .post(h.url("/auth/login"))
        .json(&json!({"username": "nobody", "password": "wrong"}))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), 401);
}

#[tokio::test]
async fn status_reflects_the_session() {
    let h = TestHarness::start().await;
    let token = h.signed_in("ann", &["editor"]).await;

    let anonymous: Value = h.get("/auth/status", None).await.json().await.unwrap();
    assert_eq!(anonymous["authenticated"], false);

    let status: Value = h.get("/auth/status", Some(&token)).await.json().await.unwrap();
    assert_eq!(status["authenticated"], true);
    assert_eq!(status["username"], "ann");
    assert_eq!(status["roles"], json!(["editor"]));
}

#[tokio::test]
async fn login_sets_a_usable_cookie() {
    let h = TestHarness::start().await;
    h.create_user("ann", "secret-password", &[]);

    let resp = h
        .client
        .post(h.url("/auth/login"))
        .json(&json!({"username": "ann", "password": "secret-password"}))
        .send()
        .await
        .unwrap();
    let cookie = resp.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(cookie.starts_with("quill_session="), "got: {cookie}");
    assert!(cookie.contains("HttpOnly"));
    let pair = cookie.split(';').next().unwrap().to_string();

    let resp = h
        .client
        .post(h.url("/post/new/create"))
        .header("Cookie", pair)
        .json(&json!({"title": "Via cookie"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn logout_revokes_the_token() {
    let h = TestHarness::start().await;
    let token = h.signed_in("ann", &[]).await;

    let resp = h
        .client
        .post(h.url("/auth/logout"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let after = h
        .post_json("/post/new/create", Some(&token), json!({"title": "Too late"}))
        .await;
    assert_eq!(after.status(), 401);
}

#[tokio::test]
async fn expired_tokens_act_as_anonymous() {
    let h = TestHarness::start().await;
    let user_id = h.create_user("ann", "secret-password", &[]);
    {
        let conn = ql_db::pool::get_conn(&h.db).unwrap();
        let past = (Utc::now() - Duration::hours(1)).to_rfc3339();
        ql_db::queries::auth::create_token(&conn, user_id, "stale-token", &past).unwrap();
    }

    let resp = h
        .post_json("/post/new/create", Some("stale-token"), json!({"title": "Stale"}))
        .await;
    assert_eq!(resp.status(), 401);

    // Public actions still work for the same caller.
    let view = h.get("/post/new/ping", Some("stale-token")).await;
    assert_eq!(view.status(), 202);
}

//! Shared test harness for end-to-end tests.
//!
//! Provides [`TestHarness`], which writes the fixture catalog and templates
//! to a temp dir, builds a full [`AppContext`] over an in-memory database,
//! and serves the router on a random port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use ql_core::config::Config;
use ql_db::pool::{init_memory_pool, DbPool};
use ql_server::context::AppContext;
use ql_server::router::build_router;
use serde_json::{json, Value};
use tempfile::TempDir;

/// Webhook base URL in the fixture catalog, replaced by the harness.
pub const HOOK_URL: &str = "http://hooks.invalid";

pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// The fixture catalog with webhook steps pointed at `hook_url`.
pub fn fixture_catalog(hook_url: &str) -> String {
    std::fs::read_to_string(fixtures_dir().join("catalog.json"))
        .expect("fixture catalog is readable")
        .replace(HOOK_URL, hook_url)
}

/// A running server over an in-memory database.
pub struct TestHarness {
    pub ctx: AppContext,
    pub db: DbPool,
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    pub dir: TempDir,
}

impl TestHarness {
    /// Start a server with the fixture catalog; webhooks go to an unroutable
    /// address.
    pub async fn start() -> Self {
        Self::with_hook_url("http://127.0.0.1:1").await
    }

    /// Start a server whose webhook steps post to `hook_url`.
    pub async fn with_hook_url(hook_url: &str) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let catalog_path = dir.path().join("catalog.json");
        std::fs::write(&catalog_path, fixture_catalog(hook_url)).unwrap();

        let mut config = Config::default();
        config.catalog.path = Some(catalog_path);
        config.templates.dir = Some(fixtures_dir().join("templates"));
        config.templates.layout = Some("layout".into());
        let config_path = write_config(dir.path(), &config);

        let db = init_memory_pool().expect("failed to create in-memory pool");
        let ctx = AppContext::new(config, Some(config_path), db.clone())
            .expect("fixture catalog loads");
        let app = build_router(ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        Self {
            ctx,
            db,
            addr,
            client,
            dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Create a user directly in the database. Uses a low bcrypt cost.
    pub fn create_user(&self, username: &str, password: &str, roles: &[&str]) -> ql_core::UserId {
        let conn = ql_db::pool::get_conn(&self.db).unwrap();
        let hash = bcrypt::hash(password, 4).unwrap();
        let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
        ql_db::queries::users::create_user(&conn, username, &hash, &roles)
            .unwrap()
            .id
    }

    /// Log in and return the session token.
    pub async fn login(&self, username: &str, password: &str) -> String {
        let resp = self
            .client
            .post(self.url("/auth/login"))
            .json(&json!({"username": username, "password": password}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "login failed for {username}");
        let body: Value = resp.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    /// Create a user and log them in.
    pub async fn signed_in(&self, username: &str, roles: &[&str]) -> String {
        self.create_user(username, "secret-password", roles);
        self.login(username, "secret-password").await
    }

    /// POST JSON to an action path, optionally with a session token.
    pub async fn post_json(&self, path: &str, token: Option<&str>, body: Value) -> reqwest::Response {
        let mut req = self.client.post(self.url(path)).json(&body);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        req.send().await.unwrap()
    }

    /// GET an action path, optionally with a session token.
    pub async fn get(&self, path: &str, token: Option<&str>) -> reqwest::Response {
        let mut req = self.client.get(self.url(path));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        req.send().await.unwrap()
    }

    /// Create a post through the `create` action and return its JSON.
    pub async fn create_post(&self, token: &str, title: &str) -> Value {
        let resp = self
            .post_json("/post/new/create", Some(token), json!({"title": title}))
            .await;
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }

    /// Overwrite the catalog file the running server was started with.
    pub fn rewrite_catalog(&self, catalog: &str) {
        std::fs::write(self.dir.path().join("catalog.json"), catalog).unwrap();
    }
}

fn write_config(dir: &Path, config: &Config) -> PathBuf {
    let path = dir.join("quill.json");
    std::fs::write(&path, serde_json::to_string_pretty(config).unwrap()).unwrap();
    path
}

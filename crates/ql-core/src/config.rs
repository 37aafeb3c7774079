//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the server, authentication, action catalog, templates and
//! outbound notifications. Every section defaults sensibly so a completely
//! empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub catalog: CatalogConfig,
    pub templates: TemplateConfig,
    pub notifications: NotificationConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    ///
    /// This is intentionally string-based so the caller can read the file
    /// however it sees fit (async, embedded, etc.).
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Configuration(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.auth.session_timeout_hours == 0 {
            warnings.push("auth.session_timeout_hours is 0; sessions expire immediately".into());
        }

        if self.catalog.path.is_none() {
            warnings.push("catalog.path is not set; no content types will be served".into());
        }

        if !self.catalog.strict {
            warnings.push(
                "catalog.strict is off; unknown step kinds will fail at request time".into(),
            );
        }

        if self.catalog.max_delegation_depth == 0 {
            warnings.push(
                "catalog.max_delegation_depth is 0; every delegation step will fail".into(),
            );
        }

        for (i, hook) in self.notifications.webhooks.iter().enumerate() {
            if hook.url.is_empty() {
                warnings.push(format!("notifications.webhooks[{i}].url is empty"));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            db_path: PathBuf::from("./data/quill.db"),
        }
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub session_timeout_hours: u64,
    pub cookie_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_timeout_hours: 24,
            cookie_name: "quill_session".into(),
        }
    }
}

/// Where the action catalog lives and how strictly it is validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Path to the JSON catalog of content types and actions.
    pub path: Option<PathBuf>,
    /// Reject unknown step kinds at load time instead of at request time.
    pub strict: bool,
    /// Upper bound on nested delegation hops within one request.
    pub max_delegation_depth: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: None,
            strict: true,
            max_delegation_depth: 8,
        }
    }
}

/// Template lookup settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Directory of `*.html` templates, keyed by file stem.
    pub dir: Option<PathBuf>,
    /// Template that wraps non-full-page bodies in the page chrome.
    pub layout: Option<String>,
}

/// Fire-and-forget notifications delivered after pipeline completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub webhooks: Vec<WebhookConfig>,
}

/// A webhook that receives background events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// Event type names to forward; empty forwards everything.
    #[serde(default)]
    pub events: Vec<String>,
}

impl WebhookConfig {
    /// Whether this webhook subscribes to the given event type.
    pub fn accepts(&self, event_type: &str) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == event_type)
    }
}

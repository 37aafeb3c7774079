//! Outbound HTTP: the awaited client integration steps call, and the
//! background notifier that forwards bus events to configured webhooks.
//!
//! Steps await [`HttpOutbound`] and see its failures as integration errors.
//! The notifier is fire-and-forget: errors are logged but never reach a
//! request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use ql_core::config::WebhookConfig;
use ql_core::events::EventBus;
use ql_core::{Error, Result};
use ql_pipeline::Outbound;

/// HTTP timeout for outbound requests.
const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared reqwest client for outbound JSON posts.
pub struct HttpOutbound {
    client: Client,
}

impl HttpOutbound {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(OUTBOUND_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build outbound HTTP client: {e}");
                Client::new()
            });

        Self { client }
    }
}

impl Default for HttpOutbound {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Outbound for HttpOutbound {
    async fn post_json(&self, url: &str, body: &Value) -> Result<()> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::integration(url, e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(url, status = %status, "Outbound post delivered");
            Ok(())
        } else {
            let text = resp.text().await.unwrap_or_default();
            Err(Error::integration(url, format!("status {status}: {text}")))
        }
    }
}

/// Forward events from `bus` to every webhook that accepts their type until
/// `cancel` fires.
pub async fn run_notifier(
    bus: Arc<EventBus>,
    webhooks: Vec<WebhookConfig>,
    outbound: Arc<dyn Outbound>,
    cancel: CancellationToken,
) {
    if webhooks.is_empty() {
        return;
    }

    let mut rx = bus.subscribe();
    tracing::info!(webhooks = webhooks.len(), "Notifier started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = rx.recv() => match result {
                Ok(event) => {
                    let event_type = event.payload.event_type();
                    let body = match serde_json::to_value(&event) {
                        Ok(body) => body,
                        Err(e) => {
                            tracing::warn!("Failed to serialize event: {e}");
                            continue;
                        }
                    };
                    for hook in webhooks.iter().filter(|h| h.accepts(event_type)) {
                        let outbound = outbound.clone();
                        let url = hook.url.clone();
                        let body = body.clone();
                        tokio::spawn(async move {
                            if let Err(e) = outbound.post_json(&url, &body).await {
                                tracing::warn!(url = %url, event_type, "Webhook delivery failed: {e}");
                            }
                        });
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("Notifier lagged by {n} events");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    tracing::info!("Notifier stopped");
}

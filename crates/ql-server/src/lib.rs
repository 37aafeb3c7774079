//! ql-server: the HTTP transport around the action pipeline engine.
//!
//! This crate wires the engine to SQLite storage and the network. It
//! provides:
//!
//! - Axum routes that map `/{content_type}/{token}/{action}` onto pipeline
//!   runs and translate pipeline results into responses
//! - Session login backed by bcrypt password hashes
//! - An SSE feed and a webhook notifier over the background event bus
//! - Hot reload of the action catalog and templates
//! - Graceful shutdown via signal handling

pub mod context;
pub mod error;
pub mod middleware;
pub mod notifications;
pub mod router;
pub mod routes;
pub mod stores;
pub mod templates;

use std::net::SocketAddr;
use std::path::PathBuf;

use ql_core::config::Config;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// Start the quill server.
///
/// Opens the database, loads the action catalog, spawns the webhook
/// notifier and serves HTTP until a shutdown signal is received.
pub async fn start(config: Config, config_path: Option<PathBuf>) -> ql_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let db_path = &config.server.db_path;
    let existed = db_path.exists();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created database directory {}", parent.display());
        }
    }
    let db_str = db_path.to_string_lossy();
    let db = ql_db::pool::init_pool(&db_str)?;
    if existed {
        tracing::info!("Database opened (existing) at {db_str}");
    } else {
        tracing::info!("Database created (new) at {db_str}");
    }

    let ctx = AppContext::new(config.clone(), config_path, db)?;

    let cancel = CancellationToken::new();

    let notifier_handle = tokio::spawn(notifications::run_notifier(
        ctx.event_bus.clone(),
        config.notifications.webhooks.clone(),
        ctx.outbound.clone(),
        cancel.clone(),
    ));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| ql_core::Error::Configuration(format!("Invalid server address: {e}")))?;

    let app = router::build_router(ctx);

    tracing::info!("Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ql_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    // Stop background tasks.
    cancel.cancel();
    let _ = notifier_handle.await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}

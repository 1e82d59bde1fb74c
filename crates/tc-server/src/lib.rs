//! tc-server: HTTP surface for segment extraction.
//!
//! This crate ties the core types and encoder plumbing into a running
//! server. It provides:
//!
//! - Axum-based HTTP API with request ids and session cookies
//! - The extraction pipeline (source cache, gate, encoder, delivery)
//! - A registry of short-lived, session-scoped previews served with byte ranges
//! - Background sweepers for idle sessions and expired previews
//! - Graceful shutdown via signal handling

pub mod context;
pub mod delivery;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod previews;
pub mod router;
pub mod routes;
pub mod sessions;
pub mod source_cache;
pub mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tc_core::config::Config;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
use crate::store::{AssetStore, HttpAssetStore};

/// Start the trimcast server.
///
/// Discovers ffmpeg, builds the [`AppContext`], starts the sweepers and
/// serves HTTP until a shutdown signal arrives.
pub async fn start(config: Config) -> tc_core::Result<()> {
    // Validate configuration.
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    // Discover external tools.
    let tools = tc_av::ToolRegistry::discover(&config.tools);
    for info in tools.check_all() {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}", info.name);
        }
    }

    let store: Arc<dyn AssetStore> = Arc::new(HttpAssetStore::new(&config.store)?);
    let ctx = AppContext::new(config.clone(), tools, store)?;

    tokio::fs::create_dir_all(&config.cache.root_dir).await?;
    ctx.previews.purge_orphans().await?;
    tracing::info!(
        cache_dir = %config.cache.root_dir.display(),
        preview_dir = %config.preview.dir.display(),
        max_concurrent_jobs = ctx.gate().capacity(),
        "Storage ready"
    );

    let cancel = ctx.shutdown.clone();

    let session_sweeper = sessions::start_session_sweeper(
        ctx.sessions.clone(),
        Duration::from_secs(config.cache.sweep_interval_secs),
        cancel.clone(),
    );
    let preview_sweeper = previews::start_preview_sweeper(
        ctx.previews.clone(),
        Duration::from_secs(config.preview.sweep_interval_secs),
        cancel.clone(),
    );

    // Build and start the HTTP server.
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| tc_core::Error::Internal(format!("Invalid server address: {e}")))?;
    let app = router::build_router(ctx);

    tracing::info!("Starting server on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| tc_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    // Cancelling on the signal ends in-flight encodes, so graceful shutdown
    // does not wait for long streams.
    let signal_cancel = cancel.clone();
    let shutdown = async move {
        shutdown_signal(signal_cancel.clone()).await;
        signal_cancel.cancel();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| tc_core::Error::Internal(format!("Server error: {e}")))?;

    // Signal all background tasks to stop.
    cancel.cancel();
    let _ = tokio::join!(session_sweeper, preview_sweeper);

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolve when Ctrl+C or SIGTERM arrives, or `cancel` fires.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
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
                tracing::error!("Failed to install SIGTERM handler: {e}");
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

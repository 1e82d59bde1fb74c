//! Application context.
//!
//! [`AppContext`] is the central struct shared across all route handlers via
//! Axum state. Infrastructure that never changes after startup (config,
//! tools, encoder supervisor, asset store) sits behind `Arc`s; the session
//! and preview registries are internally synchronized and cheap to clone.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tc_av::{ConcurrencyGate, ToolRegistry, Transcoder};
use tc_core::config::Config;
use tc_core::Result;

use crate::previews::PreviewRegistry;
use crate::sessions::SessionRegistry;
use crate::source_cache::SourceCache;
use crate::store::AssetStore;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppContext {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// External tool registry (ffmpeg).
    pub tools: Arc<ToolRegistry>,
    /// Encoder supervisor; owns the concurrency gate.
    pub transcoder: Arc<Transcoder>,
    /// Session-scoped source cache in front of the asset store.
    pub sources: SourceCache,
    pub sessions: SessionRegistry,
    pub previews: PreviewRegistry,
    /// Fires on server shutdown; encodes run under child tokens of it.
    pub shutdown: CancellationToken,
}

impl AppContext {
    /// Wire up the context. Fails if ffmpeg was not discovered.
    pub fn new(config: Config, tools: ToolRegistry, store: Arc<dyn AssetStore>) -> Result<Self> {
        let gate = ConcurrencyGate::new(config.encode.max_concurrent_jobs);
        let transcoder = Transcoder::new(&tools, gate, &config.encode)?;
        Ok(Self::with_transcoder(config, tools, transcoder, store))
    }

    /// Wire up the context around an already-built transcoder.
    pub fn with_transcoder(
        config: Config,
        tools: ToolRegistry,
        transcoder: Transcoder,
        store: Arc<dyn AssetStore>,
    ) -> Self {
        let sessions = SessionRegistry::new(
            &config.cache.root_dir,
            Duration::from_secs(config.cache.session_ttl_secs),
        );
        let sources = SourceCache::new(store, sessions.clone(), config.cache.large_asset_bytes);
        let previews = PreviewRegistry::new(&config.preview.dir, Duration::from_secs(config.preview.ttl_secs));

        Self {
            config: Arc::new(config),
            tools: Arc::new(tools),
            transcoder: Arc::new(transcoder),
            sources,
            sessions,
            previews,
            shutdown: CancellationToken::new(),
        }
    }

    /// The concurrency gate shared by all encodes.
    pub fn gate(&self) -> &ConcurrencyGate {
        self.transcoder.gate()
    }
}

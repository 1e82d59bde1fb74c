//! Session tracking and the on-disk session directories.
//!
//! Each session owns `<cache root>/<session id>/`, which holds the source
//! assets fetched on its behalf. The registry remembers when a session was
//! last seen and which large asset it currently holds; the sweeper removes
//! directories that have been idle for longer than the session TTL.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use tc_core::{AssetId, Result, SessionId};

/// What the server knows about one client session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub directory: PathBuf,
    /// The large asset currently cached for this session, if any.
    pub last_large_asset: Option<AssetId>,
    pub last_seen: DateTime<Utc>,
}

/// Thread-safe registry of sessions and their cache directories.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    root: PathBuf,
    ttl: Duration,
    sessions: Arc<DashMap<SessionId, Session>>,
}

impl SessionRegistry {
    /// Create a registry rooted at `root`. Sessions idle for longer than
    /// `ttl` are eligible for sweeping.
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding this session's cached assets. Not created here.
    pub fn directory(&self, id: SessionId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Record activity for `id`, registering the session on first sight.
    pub fn see(&self, id: SessionId) {
        let now = Utc::now();
        self.sessions
            .entry(id)
            .and_modify(|s| s.last_seen = now)
            .or_insert_with(|| self.new_session(id));
    }

    /// Record activity and make sure the session directory exists.
    pub async fn touch(&self, id: SessionId) -> Result<PathBuf> {
        self.see(id);
        let dir = self.directory(id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    fn new_session(&self, id: SessionId) -> Session {
        Session {
            id,
            directory: self.directory(id),
            last_large_asset: None,
            last_seen: Utc::now(),
        }
    }

    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.sessions.get(&id).map(|s| s.clone())
    }

    /// Make `asset` the session's large asset.
    ///
    /// Returns the previously held large asset when it differs from `asset`;
    /// the caller is responsible for deleting its file.
    pub fn replace_large_asset(&self, id: SessionId, asset: &AssetId) -> Option<AssetId> {
        let mut entry = self.sessions.entry(id).or_insert_with(|| self.new_session(id));
        match entry.last_large_asset.replace(asset.clone()) {
            Some(previous) if previous != *asset => Some(previous),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove idle session directories and forget their sessions.
    ///
    /// Sessions seen within the TTL are kept even when their files are old.
    /// Returns the number of directories removed.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let active: HashSet<String> = self
            .sessions
            .iter()
            .filter(|s| now.signed_duration_since(s.last_seen) <= ttl)
            .map(|s| s.id.to_string())
            .collect();

        let root = self.root.clone();
        let dir_ttl = self.ttl;
        let removed = match tokio::task::spawn_blocking(move || sweep_sessions(&root, dir_ttl, &active))
            .await
        {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!("Session sweep task failed: {e}");
                return 0;
            }
        };

        for name in &removed {
            if let Ok(id) = name.parse::<SessionId>() {
                self.sessions.remove(&id);
            }
        }

        // Sessions that never created a directory still age out.
        self.sessions
            .retain(|_, s| now.signed_duration_since(s.last_seen) <= ttl);

        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "Swept idle session directories");
        }
        removed.len()
    }
}

/// Remove every directory under `root` whose newest entry is older than
/// `ttl`, skipping names in `keep`. Returns the removed directory names.
///
/// Blocking; run it off the async executor.
pub fn sweep_sessions(root: &Path, ttl: Duration, keep: &HashSet<String>) -> Vec<String> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!("Cannot read session root {}: {e}", root.display());
            return Vec::new();
        }
    };

    let now = SystemTime::now();
    let mut removed = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if keep.contains(&name) {
            continue;
        }

        let Some(newest) = newest_modification(&path) else {
            continue;
        };
        let idle = now.duration_since(newest).unwrap_or_default();
        if idle <= ttl {
            continue;
        }

        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                tracing::debug!(session = %name, idle_secs = idle.as_secs(), "Removed idle session directory");
                removed.push(name);
            }
            Err(e) => tracing::warn!("Failed to remove {}: {e}", path.display()),
        }
    }

    removed
}

/// Newest modification time of `dir` or anything below it.
fn newest_modification(dir: &Path) -> Option<SystemTime> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter_map(|m| m.modified().ok())
        .max()
}

/// Spawn a background task that sweeps idle sessions every `interval`
/// until `cancel` fires.
pub fn start_session_sweeper(
    registry: SessionRegistry,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    registry.sweep().await;
                }
            }
        }
        tracing::debug!("Session sweeper stopped");
    })
}

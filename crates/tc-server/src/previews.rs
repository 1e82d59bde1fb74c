//! Registry of materialized previews.
//!
//! A preview is a finished segment file kept on disk for a short time so the
//! client can scrub it with byte-range requests without re-running the
//! encoder. Each entry belongs to the session that created it and expires
//! after the configured TTL. The file is owned by its [`PreviewHandle`] and
//! removed when the last reference goes away.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use tc_core::{Error, PreviewId, Result, SessionId, TimeRange, TrimMode};

/// A registered preview file.
#[derive(Debug)]
pub struct PreviewHandle {
    pub id: PreviewId,
    pub session_id: SessionId,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub mode: TrimMode,
    pub range: TimeRange,
    /// Suggested name when the preview is downloaded.
    pub file_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PreviewHandle {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        // Best effort; the file may already be gone.
        if std::fs::remove_file(&self.path).is_ok() {
            tracing::debug!(preview_id = %self.id, "Deleted preview file");
        }
    }
}

/// A finished segment ready to be registered.
#[derive(Debug)]
pub struct NewPreview {
    pub session_id: SessionId,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub mode: TrimMode,
    pub range: TimeRange,
    pub file_name: String,
}

/// Thread-safe map of live previews.
#[derive(Debug, Clone)]
pub struct PreviewRegistry {
    dir: PathBuf,
    ttl: Duration,
    entries: Arc<DashMap<PreviewId, Arc<PreviewHandle>>>,
}

impl PreviewRegistry {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Directory where preview files are written.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register a finished file under a fresh id.
    pub fn register(&self, preview: NewPreview) -> Arc<PreviewHandle> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(1));
        let handle = Arc::new(PreviewHandle {
            id: PreviewId::new(),
            session_id: preview.session_id,
            path: preview.path,
            size_bytes: preview.size_bytes,
            mode: preview.mode,
            range: preview.range,
            file_name: preview.file_name,
            created_at: now,
            expires_at: now + ttl,
        });

        self.entries.insert(handle.id, Arc::clone(&handle));
        tracing::info!(
            preview_id = %handle.id,
            session_id = %handle.session_id,
            size_bytes = handle.size_bytes,
            expires_at = %handle.expires_at,
            "Registered preview"
        );
        handle
    }

    /// Look up a preview on behalf of `session_id`.
    ///
    /// Unknown and expired ids are [`Error::NotFound`]; a preview owned by
    /// another session is [`Error::Forbidden`].
    pub fn get(&self, id: PreviewId, session_id: SessionId) -> Result<Arc<PreviewHandle>> {
        let handle = self
            .entries
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::not_found("preview", id))?;

        if handle.is_expired(Utc::now()) {
            drop(handle);
            self.entries.remove(&id);
            return Err(Error::not_found("preview", id));
        }

        if handle.session_id != session_id {
            tracing::warn!(
                preview_id = %id,
                owner = %handle.session_id,
                requester = %session_id,
                "Preview requested from another session"
            );
            return Err(Error::Forbidden("preview belongs to another session".into()));
        }

        Ok(handle)
    }

    /// Explicitly evict a preview owned by `session_id`.
    pub fn evict(&self, id: PreviewId, session_id: SessionId) -> Result<()> {
        self.get(id, session_id)?;
        if self.entries.remove(&id).is_some() {
            tracing::info!(preview_id = %id, "Evicted preview");
        }
        Ok(())
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, handle| !handle.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            tracing::info!(count = removed, "Swept expired previews");
        }
        removed
    }

    /// Delete leftover files in the preview directory, e.g. from a previous
    /// run. Only call this before any preview is registered.
    pub async fn purge_orphans(&self) -> Result<usize> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() && tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(count = removed, dir = %self.dir.display(), "Removed orphaned preview files");
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Spawn a background task that removes expired previews every `interval`
/// until `cancel` fires.
pub fn start_preview_sweeper(
    registry: PreviewRegistry,
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
                    registry.sweep_expired();
                }
            }
        }
        tracing::debug!("Preview sweeper stopped");
    })
}

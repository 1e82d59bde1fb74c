//! Session-scoped cache of source assets.
//!
//! A session's sources live at `<root>/<session id>/<asset id>`. A cached file
//! is reused only when its size matches the store's reported size exactly;
//! anything else is re-fetched. Downloads land in `<asset id>.part` and are
//! renamed into place after the size check, so an encoder never sees a partial
//! source. Each session keeps at most one large source at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use tc_core::{AssetId, AssetMetadata, Error, Result, SessionId};

use crate::sessions::SessionRegistry;
use crate::store::AssetStore;

/// A source asset available on local disk.
#[derive(Debug, Clone)]
pub struct SourceAsset {
    pub asset_id: AssetId,
    pub session_id: SessionId,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub mime_type: String,
    pub name: String,
}

type CacheKey = (SessionId, AssetId);

/// Resolves `(session, asset)` pairs to local files, fetching on a miss.
#[derive(Clone)]
pub struct SourceCache {
    store: Arc<dyn AssetStore>,
    sessions: SessionRegistry,
    large_asset_bytes: u64,
    locks: Arc<DashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl SourceCache {
    pub fn new(store: Arc<dyn AssetStore>, sessions: SessionRegistry, large_asset_bytes: u64) -> Self {
        Self {
            store,
            sessions,
            large_asset_bytes,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Look up the asset's metadata and make sure a complete copy is cached
    /// for `session_id`.
    pub async fn acquire(&self, session_id: SessionId, asset_id: &AssetId) -> Result<SourceAsset> {
        let metadata = self.store.metadata(asset_id).await?;
        tracing::debug!(
            session_id = %session_id,
            asset_id = %asset_id,
            size_bytes = metadata.size_bytes,
            large = metadata.is_large(self.large_asset_bytes),
            "Resolving source"
        );
        let AssetMetadata {
            size_bytes,
            mime_type,
            name,
        } = metadata;

        let local_path = self.resolve(session_id, asset_id, size_bytes).await?;
        Ok(SourceAsset {
            asset_id: asset_id.clone(),
            session_id,
            local_path,
            size_bytes,
            mime_type,
            name,
        })
    }

    /// Return the path of a complete local copy of `asset_id`, fetching it
    /// when the cached copy is missing or its size differs from
    /// `expected_size`.
    ///
    /// A fetch whose length differs from `expected_size` leaves nothing behind
    /// and fails with [`Error::IntegrityError`]; the next call fetches again.
    pub async fn resolve(
        &self,
        session_id: SessionId,
        asset_id: &AssetId,
        expected_size: u64,
    ) -> Result<PathBuf> {
        let key = (session_id, asset_id.clone());
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            self.resolve_locked(session_id, asset_id, expected_size).await
        };

        drop(lock);
        self.locks.remove_if(&key, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn resolve_locked(
        &self,
        session_id: SessionId,
        asset_id: &AssetId,
        expected_size: u64,
    ) -> Result<PathBuf> {
        let dir = self.sessions.touch(session_id).await?;
        let path = dir.join(asset_id.as_str());

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() && meta.len() == expected_size => {
                tracing::debug!(
                    session_id = %session_id,
                    asset_id = %asset_id,
                    size_bytes = expected_size,
                    "Reusing cached source"
                );
                self.note_large(session_id, asset_id, expected_size, &dir).await;
                return Ok(path);
            }
            Ok(meta) => {
                tracing::warn!(
                    session_id = %session_id,
                    asset_id = %asset_id,
                    expected = expected_size,
                    actual = meta.len(),
                    "Cached source is incomplete; fetching again"
                );
                remove_quietly(&path).await;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let started = std::time::Instant::now();
        let part = dir.join(format!("{asset_id}.part"));
        let written = self.download(asset_id, &part, expected_size).await?;
        tokio::fs::rename(&part, &path).await?;
        self.note_large(session_id, asset_id, expected_size, &dir).await;

        tracing::info!(
            session_id = %session_id,
            asset_id = %asset_id,
            bytes = written,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched source asset"
        );
        Ok(path)
    }

    /// Stream the asset into `part`. The file is removed on every failure,
    /// including when this future is dropped mid-download.
    async fn download(&self, asset_id: &AssetId, part: &Path, expected_size: u64) -> Result<u64> {
        let mut file = tokio::fs::File::create(part).await?;
        let cleanup = TempPath::try_from_path(part)?;

        let mut body = self.store.fetch(asset_id).await?;
        let mut written: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| Error::fetch_failed(asset_id, e.to_string()))?;
            written += chunk.len() as u64;
            if written > expected_size {
                break;
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        if written != expected_size {
            tracing::warn!(
                asset_id = %asset_id,
                expected = expected_size,
                actual = written,
                "Fetched size does not match metadata; discarding"
            );
            return Err(Error::IntegrityError {
                asset_id: asset_id.to_string(),
                expected: expected_size,
                actual: written,
            });
        }

        // The caller renames the completed file into place.
        cleanup.keep().map_err(|e| Error::Io { source: e.error })?;
        Ok(written)
    }

    /// Record a newly available large source and delete the session's
    /// previous one. Runs only once `asset_id` is complete on disk, so a
    /// failed fetch never costs the session its current large source.
    async fn note_large(&self, session_id: SessionId, asset_id: &AssetId, size: u64, dir: &Path) {
        if size <= self.large_asset_bytes {
            return;
        }
        if let Some(previous) = self.sessions.replace_large_asset(session_id, asset_id) {
            tracing::info!(
                session_id = %session_id,
                evicted = %previous,
                replacement = %asset_id,
                "Evicting previous large source"
            );
            remove_quietly(&dir.join(previous.as_str())).await;
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ByteStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Store serving fixed contents; `reported` overrides the metadata size.
    #[derive(Default)]
    struct FixedStore {
        contents: HashMap<String, Vec<u8>>,
        reported: HashMap<String, u64>,
        fetches: AtomicUsize,
    }

    impl FixedStore {
        fn with(mut self, id: &str, bytes: Vec<u8>) -> Self {
            self.contents.insert(id.into(), bytes);
            self
        }

        fn reporting(mut self, id: &str, size: u64) -> Self {
            self.reported.insert(id.into(), size);
            self
        }
    }

    #[async_trait]
    impl AssetStore for FixedStore {
        async fn metadata(&self, asset_id: &AssetId) -> Result<AssetMetadata> {
            let bytes = self
                .contents
                .get(asset_id.as_str())
                .ok_or_else(|| Error::metadata_unavailable(asset_id, "unknown"))?;
            Ok(AssetMetadata {
                size_bytes: self
                    .reported
                    .get(asset_id.as_str())
                    .copied()
                    .unwrap_or(bytes.len() as u64),
                mime_type: "video/mp4".into(),
                name: format!("{asset_id}.mp4"),
            })
        }

        async fn fetch(&self, asset_id: &AssetId) -> Result<ByteStream> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            // Yield to make concurrent resolves interleave.
            tokio::time::sleep(Duration::from_millis(20)).await;
            let bytes = self
                .contents
                .get(asset_id.as_str())
                .cloned()
                .ok_or_else(|| Error::fetch_failed(asset_id, "unknown"))?;
            let chunks: Vec<std::io::Result<Bytes>> = bytes
                .chunks(100)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    fn asset(id: &str) -> AssetId {
        AssetId::parse(id).unwrap()
    }

    fn cache_with(store: Arc<FixedStore>, root: &Path, large: u64) -> SourceCache {
        let sessions = SessionRegistry::new(root, Duration::from_secs(3600));
        SourceCache::new(store, sessions, large)
    }

    #[tokio::test]
    async fn fetches_once_then_reuses() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(FixedStore::default().with("a", vec![1; 450]));
        let cache = cache_with(store.clone(), root.path(), u64::MAX);
        let session = SessionId::new();

        let first = cache.acquire(session, &asset("a")).await.unwrap();
        assert_eq!(first.size_bytes, 450);
        assert_eq!(std::fs::metadata(&first.local_path).unwrap().len(), 450);
        assert_eq!(first.local_path, root.path().join(session.to_string()).join("a"));

        let second = cache.acquire(session, &asset("a")).await.unwrap();
        assert_eq!(second.local_path, first.local_path);
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sessions_do_not_share_sources() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(FixedStore::default().with("a", vec![1; 10]));
        let cache = cache_with(store.clone(), root.path(), u64::MAX);

        let one = cache.acquire(SessionId::new(), &asset("a")).await.unwrap();
        let two = cache.acquire(SessionId::new(), &asset("a")).await.unwrap();
        assert_ne!(one.local_path, two.local_path);
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn size_mismatch_is_integrity_error_and_leaves_nothing() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(FixedStore::default().with("short", vec![1; 300]).reporting("short", 500));
        let cache = cache_with(store.clone(), root.path(), u64::MAX);
        let session = SessionId::new();

        let err = cache.acquire(session, &asset("short")).await.unwrap_err();
        match err {
            Error::IntegrityError { expected, actual, .. } => {
                assert_eq!(expected, 500);
                assert_eq!(actual, 300);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let dir = root.path().join(session.to_string());
        assert!(!dir.join("short").exists());
        assert!(!dir.join("short.part").exists());

        // No reuse of the corrupt file: the retry fetches again.
        let _ = cache.acquire(session, &asset("short")).await;
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn oversized_fetch_is_integrity_error() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(FixedStore::default().with("long", vec![1; 900]).reporting("long", 400));
        let cache = cache_with(store, root.path(), u64::MAX);

        let err = cache.acquire(SessionId::new(), &asset("long")).await.unwrap_err();
        assert_eq!(err.code(), "integrity_error");
    }

    #[tokio::test]
    async fn truncated_cached_copy_is_refetched() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(FixedStore::default().with("a", vec![1; 200]));
        let cache = cache_with(store.clone(), root.path(), u64::MAX);
        let session = SessionId::new();

        let first = cache.acquire(session, &asset("a")).await.unwrap();
        std::fs::write(&first.local_path, vec![1; 50]).unwrap();

        let second = cache.acquire(session, &asset("a")).await.unwrap();
        assert_eq!(std::fs::metadata(&second.local_path).unwrap().len(), 200);
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn new_large_asset_evicts_previous() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(
            FixedStore::default()
                .with("big1", vec![1; 300])
                .with("big2", vec![2; 300])
                .with("small", vec![3; 10]),
        );
        let cache = cache_with(store, root.path(), 100);
        let session = SessionId::new();

        let big1 = cache.acquire(session, &asset("big1")).await.unwrap();
        let small = cache.acquire(session, &asset("small")).await.unwrap();
        assert!(big1.local_path.exists());

        let big2 = cache.acquire(session, &asset("big2")).await.unwrap();
        assert!(!big1.local_path.exists());
        assert!(big2.local_path.exists());
        // Small assets are not subject to the one-large rule.
        assert!(small.local_path.exists());
    }

    #[tokio::test]
    async fn failed_large_fetch_keeps_previous_large() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(
            FixedStore::default()
                .with("big1", vec![1; 300])
                .with("broken", vec![2; 300])
                .reporting("broken", 400)
                .with("big2", vec![3; 300]),
        );
        let cache = cache_with(store, root.path(), 100);
        let session = SessionId::new();

        let big1 = cache.acquire(session, &asset("big1")).await.unwrap();
        let err = cache.acquire(session, &asset("broken")).await.unwrap_err();
        assert_eq!(err.code(), "integrity_error");
        assert!(big1.local_path.exists());

        // big1 is still the session's large source, so the next one evicts it.
        let big2 = cache.acquire(session, &asset("big2")).await.unwrap();
        assert!(!big1.local_path.exists());
        assert!(big2.local_path.exists());
    }

    #[tokio::test]
    async fn empty_asset_is_allowed_when_empty() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(FixedStore::default().with("empty", Vec::new()));
        let cache = cache_with(store, root.path(), u64::MAX);

        let src = cache.acquire(SessionId::new(), &asset("empty")).await.unwrap();
        assert_eq!(src.size_bytes, 0);
        assert!(src.local_path.exists());
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_fetch() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(FixedStore::default().with("a", vec![1; 1000]));
        let cache = cache_with(store.clone(), root.path(), u64::MAX);
        let session = SessionId::new();
        let id = asset("a");

        let (a, b) = tokio::join!(
            cache.resolve(session, &id, 1000),
            cache.resolve(session, &id, 1000)
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
        assert!(cache.locks.is_empty());
    }

    #[tokio::test]
    async fn unknown_asset_surfaces_metadata_error() {
        let root = tempfile::tempdir().unwrap();
        let cache = cache_with(Arc::new(FixedStore::default()), root.path(), u64::MAX);
        let err = cache.acquire(SessionId::new(), &asset("nope")).await.unwrap_err();
        assert_eq!(err.code(), "metadata_unavailable");
    }
}

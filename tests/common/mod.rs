//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a full [`AppContext`] over temp
//! directories, an in-memory [`AssetStore`] and a shell script standing in
//! for ffmpeg. [`TestHarness::serve`] starts Axum on a random port for
//! HTTP-level testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use tc_av::ToolRegistry;
use tc_core::config::Config;
use tc_core::{AssetId, AssetMetadata, Error, Result};
use tc_server::context::AppContext;
use tc_server::router::build_router;
use tc_server::store::{AssetStore, ByteStream};

/// Encoder that writes a fixed payload to its output (file or stdout) and
/// records its arguments in `args.log` next to itself.
pub const WRITES_SEGMENT: &str = r#"
dir=$(dirname "$0")
echo "$@" >> "$dir/args.log"
for last; do :; done
if [ "$last" = "pipe:1" ]; then
  printf 'streamed-segment-bytes'
else
  printf 'encoded-segment-bytes' > "$last"
fi
"#;

/// Encoder that fails with a diagnostic on stderr.
pub const FAILS: &str = r#"
echo "moov atom not found: /secret/path/source" >&2
exit 1
"#;

/// Encoder that records its pid and then hangs.
pub const HANGS: &str = r#"
dir=$(dirname "$0")
echo $$ > "$dir/encoder.pid"
exec sleep 30
"#;

/// Encoder that records its pid and streams output forever.
pub const STREAMS_FOREVER: &str = r#"
dir=$(dirname "$0")
echo $$ > "$dir/encoder.pid"
while :; do
  printf '0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef'
  sleep 0.01
done
"#;

/// In-memory asset store with per-asset fetch counters.
#[derive(Default)]
pub struct MemoryStore {
    assets: Mutex<HashMap<String, (AssetMetadata, Vec<u8>)>>,
    fetches: AtomicUsize,
}

impl MemoryStore {
    pub fn insert(&self, id: &str, name: &str, bytes: Vec<u8>) {
        let metadata = AssetMetadata {
            size_bytes: bytes.len() as u64,
            mime_type: "video/mp4".into(),
            name: name.into(),
        };
        self.assets.lock().unwrap().insert(id.into(), (metadata, bytes));
    }

    /// Make the metadata lie about the asset's size.
    pub fn misreport_size(&self, id: &str, size: u64) {
        if let Some((meta, _)) = self.assets.lock().unwrap().get_mut(id) {
            meta.size_bytes = size;
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetStore for MemoryStore {
    async fn metadata(&self, asset_id: &AssetId) -> Result<AssetMetadata> {
        self.assets
            .lock()
            .unwrap()
            .get(asset_id.as_str())
            .map(|(meta, _)| meta.clone())
            .ok_or_else(|| Error::metadata_unavailable(asset_id, "not public"))
    }

    async fn fetch(&self, asset_id: &AssetId) -> Result<ByteStream> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let bytes = self
            .assets
            .lock()
            .unwrap()
            .get(asset_id.as_str())
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| Error::fetch_failed(asset_id, "store returned 404"))?;
        let chunks: Vec<std::io::Result<Bytes>> = bytes
            .chunks(4096)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Test harness wrapping a fully-constructed [`AppContext`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub store: Arc<MemoryStore>,
    pub dir: tempfile::TempDir,
}

impl TestHarness {
    /// Harness whose encoder runs `script`, with default configuration.
    pub fn new(script: &str) -> Self {
        Self::with_config(script, |_| {})
    }

    /// Harness whose encoder runs `script`; `tweak` adjusts the config.
    pub fn with_config(script: &str, tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let program = fake_encoder(dir.path(), script);

        let mut config = Config::default();
        config.cache.root_dir = dir.path().join("sessions");
        config.preview.dir = dir.path().join("previews");
        tweak(&mut config);

        let store = Arc::new(MemoryStore::default());
        store.insert("clip", "holiday.mp4", vec![7u8; 10_000]);

        let ctx = AppContext::new(config, ToolRegistry::with_tool("ffmpeg", program), store.clone())
            .expect("failed to build context");

        Self { ctx, store, dir }
    }

    /// Start an Axum server on a random port and return its address.
    pub async fn serve(&self) -> SocketAddr {
        let app = build_router(self.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        addr
    }

    /// Arguments of every encoder invocation so far.
    pub fn encoder_args(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("args.log"))
            .map(|s| s.lines().map(String::from).collect())
            .unwrap_or_default()
    }

    pub fn pid_file(&self) -> PathBuf {
        self.dir.path().join("encoder.pid")
    }

    /// Files currently in the preview directory.
    pub fn preview_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.ctx.previews.dir())
            .map(|entries| entries.flatten().map(|e| e.path()).collect())
            .unwrap_or_default()
    }
}

/// Write an executable shell script standing in for ffmpeg.
pub fn fake_encoder(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-ffmpeg");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// The `name=value` part of a response's `Set-Cookie` header.
pub fn session_cookie(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("set-cookie")
        .expect("no session cookie issued")
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

/// Poll `check` until it holds or a few seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool, what: &str) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// Read a pid file once the encoder has written it.
pub async fn read_pid(path: &Path) -> String {
    let mut pid = String::new();
    eventually(
        || {
            pid = std::fs::read_to_string(path).unwrap_or_default().trim().to_string();
            !pid.is_empty()
        },
        "encoder pid file",
    )
    .await;
    pid
}

pub fn process_alive(pid: &str) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // Zombies count as dead: the process has exited.
        Ok(stat) => !stat
            .rsplit_once(')')
            .map(|(_, rest)| rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => std::process::Command::new("kill")
            .args(["-0", pid])
            .status()
            .map(|s| s.success())
            .unwrap_or(false),
    }
}

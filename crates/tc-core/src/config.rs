//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the server, tools, encoder, caches, and the remote store.
//! Every section defaults sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::media::DeliveryIntent;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tools: ToolsConfig,
    pub encode: EncodeConfig,
    pub cache: CacheConfig,
    pub preview: PreviewConfig,
    pub store: StoreConfig,
    pub session: SessionConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
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

        if self.encode.max_concurrent_jobs == 0 {
            warnings.push("encode.max_concurrent_jobs is 0; it will be treated as 1".into());
        }

        if self.encode.preview_timeout_secs == 0 || self.encode.download_timeout_secs == 0 {
            warnings.push("encode timeouts of 0 seconds fail every job".into());
        } else if self.encode.preview_timeout_secs > self.encode.download_timeout_secs {
            warnings.push(
                "encode.preview_timeout_secs is longer than encode.download_timeout_secs".into(),
            );
        }

        for (name, profile) in [
            ("preview", &self.encode.preview),
            ("download", &self.encode.download),
        ] {
            if profile.crf > 51 {
                warnings.push(format!("encode.{name}.crf {} is outside 0..=51", profile.crf));
            }
            if profile.preset.trim().is_empty() {
                warnings.push(format!("encode.{name}.preset is empty"));
            }
        }

        if self.preview.ttl_secs == 0 {
            warnings.push("preview.ttl_secs is 0; previews expire immediately".into());
        }

        if self.cache.session_ttl_secs < self.preview.ttl_secs {
            warnings.push(
                "cache.session_ttl_secs is shorter than preview.ttl_secs".into(),
            );
        }

        if !(self.store.base_url.starts_with("http://")
            || self.store.base_url.starts_with("https://"))
        {
            warnings.push(format!(
                "store.base_url '{}' is not an http(s) URL",
                self.store.base_url
            ));
        }

        if self.session.cookie_name.is_empty()
            || !self
                .session
                .cookie_name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            warnings.push(format!(
                "session.cookie_name '{}' is not a valid cookie token",
                self.session.cookie_name
            ));
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
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
}

/// Encoder quality settings for one delivery intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityProfile {
    /// x264 speed preset.
    pub preset: String,
    pub crf: u32,
    pub audio_bitrate: String,
    /// Output height cap; the source is never upscaled.
    #[serde(default)]
    pub max_height: Option<u32>,
}

impl QualityProfile {
    /// Fastest settings, small output.
    pub fn preview() -> Self {
        Self {
            preset: "ultrafast".into(),
            crf: 30,
            audio_bitrate: "96k".into(),
            max_height: Some(480),
        }
    }

    /// Slower settings, full resolution.
    pub fn download() -> Self {
        Self {
            preset: "medium".into(),
            crf: 20,
            audio_bitrate: "192k".into(),
            max_height: None,
        }
    }
}

/// Encoder admission and per-intent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    pub max_concurrent_jobs: usize,
    pub preview_timeout_secs: u64,
    pub download_timeout_secs: u64,
    #[serde(default = "QualityProfile::preview")]
    pub preview: QualityProfile,
    #[serde(default = "QualityProfile::download")]
    pub download: QualityProfile,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            preview_timeout_secs: 120,
            download_timeout_secs: 900,
            preview: QualityProfile::preview(),
            download: QualityProfile::download(),
        }
    }
}

impl EncodeConfig {
    /// Quality profile used for the given intent.
    pub fn profile(&self, intent: DeliveryIntent) -> &QualityProfile {
        match intent {
            DeliveryIntent::Preview => &self.preview,
            DeliveryIntent::Download => &self.download,
        }
    }

    /// Wall-clock budget for one encoder run of the given intent.
    pub fn timeout(&self, intent: DeliveryIntent) -> Duration {
        match intent {
            DeliveryIntent::Preview => Duration::from_secs(self.preview_timeout_secs),
            DeliveryIntent::Download => Duration::from_secs(self.download_timeout_secs),
        }
    }
}

/// Session-scoped source cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub root_dir: PathBuf,
    /// Assets above this size count as "large"; one is kept per session.
    pub large_asset_bytes: u64,
    pub session_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./data/sessions"),
            large_asset_bytes: 200 * 1024 * 1024,
            session_ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

/// Registered preview settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub dir: PathBuf,
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/previews"),
            ttl_secs: 600,
            sweep_interval_secs: 30,
        }
    }
}

/// Remote asset store client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub base_url: String,
    /// Connect timeout; content downloads are not time-boxed.
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000".into(),
            timeout_secs: 30,
        }
    }
}

/// Session cookie settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub secure_cookie: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "trimcast_session".into(),
            secure_cookie: false,
        }
    }
}

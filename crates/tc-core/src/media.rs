//! Media-domain types shared by the encoder and the HTTP layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::time_range::TimeRange;
use crate::Error;

// ---------------------------------------------------------------------------
// DeliveryIntent
// ---------------------------------------------------------------------------

/// What the caller wants to do with the extracted segment.
///
/// The intent selects the quality profile and the encoder deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryIntent {
    /// Scrubbable, low-latency, lower quality.
    #[default]
    Preview,
    /// Downloadable artifact, higher quality.
    Download,
}

impl fmt::Display for DeliveryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preview => write!(f, "preview"),
            Self::Download => write!(f, "download"),
        }
    }
}

impl FromStr for DeliveryIntent {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "preview" => Ok(Self::Preview),
            "download" => Ok(Self::Download),
            other => Err(Error::Validation(format!(
                "unknown intent '{other}' (expected preview or download)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// AssetMetadata
// ---------------------------------------------------------------------------

/// Description of a remote asset as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub size_bytes: u64,
    pub mime_type: String,
    pub name: String,
}

impl AssetMetadata {
    /// Whether the asset counts as "large" for the per-session cache limit.
    pub fn is_large(&self, threshold: u64) -> bool {
        self.size_bytes > threshold
    }
}

/// MIME type of every produced segment.
pub const SEGMENT_MIME: &str = "video/mp4";

/// Build the attachment file name for a segment of `asset_name`.
///
/// Produces `<stem>_<start>-<end>.mp4` where the stem keeps only characters
/// that are safe inside a quoted `Content-Disposition` value.
pub fn segment_file_name(asset_name: &str, range: &TimeRange) -> String {
    let stem = asset_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(asset_name);

    let mut clean: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(100)
        .collect();
    if clean.trim_matches(|c| c == '_' || c == '.').is_empty() {
        clean = "segment".into();
    }

    format!(
        "{clean}_{}-{}.mp4",
        range.ffmpeg_start(),
        TimeRange::format_seconds(range.end_ms)
    )
}

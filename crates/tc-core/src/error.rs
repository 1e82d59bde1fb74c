//! Unified error type for trimcast.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for API handlers to derive an HTTP status code via [`Error::http_status`]
//! and a stable machine-readable code via [`Error::code`].

use std::fmt;
use std::time::Duration;

/// Unified error type covering every failure mode of segment extraction.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested time range is malformed, non-finite, or has `end <= start`.
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// The remote store could not describe the asset (missing or not public).
    #[error("Metadata unavailable for asset {asset_id}: {reason}")]
    MetadataUnavailable {
        /// Asset that was looked up.
        asset_id: String,
        /// Why the lookup failed.
        reason: String,
    },

    /// Downloading the asset content failed.
    #[error("Fetch failed for asset {asset_id}: {message}")]
    FetchFailed {
        /// Asset being downloaded.
        asset_id: String,
        /// Human-readable error description.
        message: String,
    },

    /// The downloaded file did not match the expected size.
    #[error("Integrity error for asset {asset_id}: expected {expected} bytes, got {actual}")]
    IntegrityError {
        /// Asset being downloaded.
        asset_id: String,
        /// Size announced by the store metadata.
        expected: u64,
        /// Size actually written to disk.
        actual: u64,
    },

    /// The encoder exited unsuccessfully.
    ///
    /// `stderr` is kept for logging and is deliberately absent from `Display`.
    #[error("Encoder failed (exit code {})", code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    EncodeFailure {
        /// Process exit code, `None` if killed by a signal.
        code: Option<i32>,
        /// Captured tail of the encoder's error stream.
        stderr: String,
    },

    /// The encoder ran past its deadline and was killed.
    #[error("Encoder timed out after {after:?}")]
    EncodeTimeout {
        /// Time budget that was exceeded.
        after: Duration,
    },

    /// The requesting peer went away before the job finished.
    #[error("Cancelled: client disconnected")]
    Cancelled,

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "preview").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The caller's session does not own the requested resource.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Request data failed validation outside of the range itself.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool could not be located or launched.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    ///
    /// Every extraction failure kind gets its own status so clients can tell
    /// them apart without parsing the message.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidRange(_) => 400,
            Error::Validation(_) => 400,
            Error::Forbidden(_) => 403,
            Error::NotFound { .. } => 404,
            Error::EncodeFailure { .. } => 422,
            Error::MetadataUnavailable { .. } => 424,
            // Non-standard "client closed request", as popularised by nginx.
            Error::Cancelled => 499,
            Error::FetchFailed { .. } => 502,
            Error::IntegrityError { .. } => 503,
            Error::EncodeTimeout { .. } => 504,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidRange(_) => "invalid_range",
            Error::MetadataUnavailable { .. } => "metadata_unavailable",
            Error::FetchFailed { .. } => "fetch_failed",
            Error::IntegrityError { .. } => "integrity_error",
            Error::EncodeFailure { .. } => "encode_failure",
            Error::EncodeTimeout { .. } => "encode_timeout",
            Error::Cancelled => "cancelled",
            Error::NotFound { .. } => "not_found",
            Error::Forbidden(_) => "forbidden",
            Error::Validation(_) => "validation_error",
            Error::Io { .. } => "io_error",
            Error::Tool { .. } => "tool_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::InvalidRange`].
    pub fn invalid_range(msg: impl Into<String>) -> Self {
        Error::InvalidRange(msg.into())
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::MetadataUnavailable`].
    pub fn metadata_unavailable(asset_id: impl fmt::Display, reason: impl Into<String>) -> Self {
        Error::MetadataUnavailable {
            asset_id: asset_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`Error::FetchFailed`].
    pub fn fetch_failed(asset_id: impl fmt::Display, message: impl Into<String>) -> Self {
        Error::FetchFailed {
            asset_id: asset_id.to_string(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether the error was raised while the encoder was (or would be) running.
    pub fn is_encode_error(&self) -> bool {
        matches!(
            self,
            Error::EncodeFailure { .. } | Error::EncodeTimeout { .. } | Error::Cancelled
        )
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

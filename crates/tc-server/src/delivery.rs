//! Output delivery: streamed encoder output, one-shot temp files, and
//! range-addressable previews.
//!
//! Every file-backed body owns whatever keeps its file alive (a [`TempPath`]
//! or an `Arc<PreviewHandle>`), so cleanup runs when the transfer finishes,
//! fails, or the client disconnects and hyper drops the body.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use tc_av::EncodeStream;
use tc_core::{Error, Result, TrimMode, SEGMENT_MIME};

use crate::previews::PreviewHandle;

/// Read size for file-backed bodies.
pub const CHUNK_BYTES: usize = 64 * 1024;

/// Response header naming the trim policy that produced the segment.
pub const X_TRIM_MODE: &str = "x-trim-mode";

/// A single byte range from a `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=START-` or `bytes=START-END`.
    From { start: u64, end: Option<u64> },
    /// `bytes=-N`: the last `N` bytes.
    Suffix(u64),
}

impl ByteRange {
    /// Clamp to a body of `size` bytes. Returns the inclusive `(start, end)`
    /// or `None` when the range cannot be satisfied.
    pub fn resolve(self, size: u64) -> Option<(u64, u64)> {
        if size == 0 {
            return None;
        }
        let last = size - 1;
        match self {
            ByteRange::From { start, end } => {
                let end = end.unwrap_or(last).min(last);
                (start <= end).then_some((start, end))
            }
            ByteRange::Suffix(0) => None,
            ByteRange::Suffix(n) => Some((size.saturating_sub(n), last)),
        }
    }
}

/// Parse a `Range: bytes=...` header value.
///
/// Only single ranges are understood; multi-range and malformed headers
/// yield `None` and are served as a full response.
pub fn parse_range_header(value: &str) -> Option<ByteRange> {
    let spec = value.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start_str, end_str) = spec.split_once('-')?;
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    if start_str.is_empty() {
        return end_str.parse().ok().map(ByteRange::Suffix);
    }

    let start: u64 = start_str.parse().ok()?;
    let end: Option<u64> = if end_str.is_empty() {
        None
    } else {
        Some(end_str.parse().ok()?)
    };
    Some(ByteRange::From { start, end })
}

/// `Content-Disposition` value offering `file_name` as a download.
pub fn attachment(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

/// Wrap a reader in a body that keeps `guard` alive until the body is
/// finished or dropped.
fn guarded_body<R, G>(reader: R, guard: G) -> Body
where
    R: AsyncRead + Unpin + Send + 'static,
    G: Send + 'static,
{
    let stream = async_stream::stream! {
        let _guard = guard;
        let mut chunks = ReaderStream::with_capacity(reader, CHUNK_BYTES);
        while let Some(chunk) = chunks.next().await {
            yield chunk;
        }
    };
    Body::from_stream(stream)
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// Stream encoder stdout straight to the client.
///
/// The response is chunked; dropping it (client gone) drops the encode
/// stream, which kills the encoder.
pub fn stream_encoder_output(stream: EncodeStream, mode: TrimMode, file_name: Option<&str>) -> Response {
    let body = stream.map(|item| {
        item.map_err(|e| {
            tracing::warn!(error = %e, "Segment stream ended with an error");
            std::io::Error::other(e.to_string())
        })
    });

    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(SEGMENT_MIME)),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        Body::from_stream(body),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert(X_TRIM_MODE, header_value(&mode.to_string()));
    if let Some(name) = file_name {
        headers.insert(header::CONTENT_DISPOSITION, header_value(&attachment(name)));
    }
    response
}

/// Send a finished temp file as a download and unlink it afterwards.
///
/// The file is removed exactly once: when the body completes, errors, or
/// is dropped before completion.
pub async fn serve_temp_file(path: TempPath, file_name: &str, mode: TrimMode) -> Result<Response> {
    let file = tokio::fs::File::open(&path).await?;
    let size = file.metadata().await?.len();

    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(SEGMENT_MIME)),
            (header::CONTENT_LENGTH, HeaderValue::from(size)),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        guarded_body(file, path),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_DISPOSITION, header_value(&attachment(file_name)));
    headers.insert(X_TRIM_MODE, header_value(&mode.to_string()));
    Ok(response)
}

/// Serve a registered preview, honoring a single byte range.
///
/// With `download` set the response carries `Content-Disposition:
/// attachment`; the bytes are the same either way.
pub async fn serve_preview(
    handle: Arc<PreviewHandle>,
    range_header: Option<&str>,
    download: bool,
) -> Result<Response> {
    let mut file = tokio::fs::File::open(&handle.path)
        .await
        .map_err(|_| Error::not_found("preview", handle.id))?;
    let size = file.metadata().await?.len();

    let range = range_header.and_then(parse_range_header);
    let disposition = download.then(|| header_value(&attachment(&handle.file_name)));

    let mut response = match range {
        Some(requested) => {
            let Some((start, end)) = requested.resolve(size) else {
                tracing::debug!(preview_id = %handle.id, ?requested, size, "Unsatisfiable range");
                return Ok((
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(header::CONTENT_RANGE, header_value(&format!("bytes */{size}")))],
                    Body::empty(),
                )
                    .into_response());
            };

            let length = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start)).await?;
            let limited = file.take(length);

            (
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_TYPE, HeaderValue::from_static(SEGMENT_MIME)),
                    (
                        header::CONTENT_RANGE,
                        header_value(&format!("bytes {start}-{end}/{size}")),
                    ),
                    (header::CONTENT_LENGTH, HeaderValue::from(length)),
                    (header::ACCEPT_RANGES, HeaderValue::from_static("bytes")),
                ],
                guarded_body(limited, handle.clone()),
            )
                .into_response()
        }
        None => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, HeaderValue::from_static(SEGMENT_MIME)),
                (header::CONTENT_LENGTH, HeaderValue::from(size)),
                (header::ACCEPT_RANGES, HeaderValue::from_static("bytes")),
            ],
            guarded_body(file, handle.clone()),
        )
            .into_response(),
    };

    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("private, no-cache"));
    headers.insert(X_TRIM_MODE, header_value(&handle.mode.to_string()));
    if let Some(value) = disposition {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

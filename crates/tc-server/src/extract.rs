//! The segment extraction pipeline.
//!
//! `range → source → gate → encoder → delivery`. The range is normalized
//! before anything else so a malformed request never touches the cache or
//! the gate; source failures abort before an encode job exists.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempPath;
use tokio_util::sync::CancellationToken;

use tc_av::{EncodeJob, EncodeStream};
use tc_core::{
    segment_file_name, AssetId, DeliveryIntent, Error, RangeSpec, Result, SessionId, TimeRange,
    TrimMode,
};

use crate::context::AppContext;
use crate::previews::{NewPreview, PreviewHandle};

/// One `ExtractSegment` call.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub asset_id: AssetId,
    pub range: RangeSpec,
    pub intent: DeliveryIntent,
    /// Pipe encoder output to the caller instead of materializing a file.
    pub stream: bool,
}

/// What the pipeline produced.
pub enum Extracted {
    /// Encoder stdout, still being produced.
    Streamed {
        body: EncodeStream,
        mode: TrimMode,
        range: TimeRange,
        file_name: String,
    },
    /// A finished download; the file is deleted when `path` is dropped.
    File {
        path: TempPath,
        mode: TrimMode,
        range: TimeRange,
        file_name: String,
    },
    /// A finished preview registered for range access.
    Preview(Arc<PreviewHandle>),
}

/// Run the pipeline for `session_id`.
///
/// `cancel` aborts a queued or running encode. Dropping the returned future
/// has the same effect: the encoder is killed and partial output removed.
pub async fn extract_segment(
    ctx: &AppContext,
    session_id: SessionId,
    request: ExtractRequest,
    cancel: CancellationToken,
) -> Result<Extracted> {
    let normalized = request.range.normalize()?;
    let (range, mode) = (normalized.range, normalized.mode);

    let source = ctx.sources.acquire(session_id, &request.asset_id).await?;
    let file_name = segment_file_name(&source.name, &range);

    tracing::info!(
        session_id = %session_id,
        asset_id = %request.asset_id,
        range = %range,
        mode = %mode,
        force_precise = normalized.force_precise,
        intent = %request.intent,
        stream = request.stream,
        "Extracting segment"
    );

    let job = EncodeJob {
        source: source.local_path,
        range,
        mode,
        intent: request.intent,
    };

    if request.stream {
        let body = ctx.transcoder.encode_to_stream(&job, cancel).await?;
        return Ok(Extracted::Streamed {
            body,
            mode,
            range,
            file_name,
        });
    }

    let output = new_output_path(ctx.previews.dir()).await?;
    let report = ctx.transcoder.encode_to_file(&job, &output, &cancel).await?;

    match request.intent {
        DeliveryIntent::Download => Ok(Extracted::File {
            path: output,
            mode,
            range,
            file_name,
        }),
        DeliveryIntent::Preview => {
            let path = output
                .keep()
                .map_err(|e| Error::Io { source: e.error })?;
            let handle = ctx.previews.register(NewPreview {
                session_id,
                path,
                size_bytes: report.bytes,
                mode,
                range,
                file_name,
            });
            Ok(Extracted::Preview(handle))
        }
    }
}

/// Reserve a fresh output file; it is deleted unless explicitly kept.
async fn new_output_path(dir: &Path) -> Result<TempPath> {
    tokio::fs::create_dir_all(dir).await?;
    let file = tempfile::Builder::new()
        .prefix("segment-")
        .suffix(".mp4")
        .tempfile_in(dir)?;
    Ok(file.into_temp_path())
}

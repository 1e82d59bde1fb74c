//! Segment extraction route handlers.
//!
//! `GET /api/assets/{asset_id}/segment` takes the range and options as query
//! parameters; `POST` takes the same fields as a JSON body.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tc_core::{AssetId, DeliveryIntent, PreviewId, RangeSpec, SessionId, TrimMode};

use crate::context::AppContext;
use crate::delivery;
use crate::error::{AppError, ForRequest};
use crate::extract::{extract_segment, ExtractRequest, Extracted};
use crate::middleware::request_id::RequestId;
use crate::previews::PreviewHandle;

/// Range and delivery options accepted by the segment endpoints.
///
/// Fields are spelled out rather than flattened from [`RangeSpec`] because
/// query-string deserialization cannot parse numbers through a flatten.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SegmentParams {
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub precise: Option<bool>,
    pub mode: Option<String>,
    /// `preview` (default) or `download`.
    pub intent: Option<String>,
    pub stream: Option<bool>,
}

impl SegmentParams {
    pub fn range_spec(&self) -> RangeSpec {
        RangeSpec {
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            start: self.start,
            end: self.end,
            start_time: self.start_time.clone(),
            end_time: self.end_time.clone(),
            precise: self.precise,
            mode: self.mode.clone(),
        }
    }

    pub fn intent(&self) -> tc_core::Result<DeliveryIntent> {
        match self.intent.as_deref().map(str::trim) {
            None | Some("") => Ok(DeliveryIntent::default()),
            Some(raw) => raw.parse(),
        }
    }
}

/// Body of a `201 Created` preview response.
#[derive(Debug, Serialize)]
pub struct PreviewCreated {
    pub id: PreviewId,
    pub url: String,
    pub expires_at: DateTime<Utc>,
    pub mode: TrimMode,
    pub start_ms: u64,
    pub end_ms: u64,
    pub duration_ms: u64,
    pub size_bytes: u64,
}

impl From<&PreviewHandle> for PreviewCreated {
    fn from(handle: &PreviewHandle) -> Self {
        Self {
            id: handle.id,
            url: format!("/api/previews/{}", handle.id),
            expires_at: handle.expires_at,
            mode: handle.mode,
            start_ms: handle.range.start_ms,
            end_ms: handle.range.end_ms,
            duration_ms: handle.range.duration_ms(),
            size_bytes: handle.size_bytes,
        }
    }
}

/// GET /api/assets/{asset_id}/segment
pub async fn get_segment(
    State(ctx): State<AppContext>,
    Extension(session_id): Extension<SessionId>,
    Extension(request_id): Extension<RequestId>,
    Path(asset_id): Path<String>,
    Query(params): Query<SegmentParams>,
) -> Result<Response, AppError> {
    run(ctx, session_id, request_id, asset_id, params).await
}

/// POST /api/assets/{asset_id}/segment
pub async fn post_segment(
    State(ctx): State<AppContext>,
    Extension(session_id): Extension<SessionId>,
    Extension(request_id): Extension<RequestId>,
    Path(asset_id): Path<String>,
    Json(params): Json<SegmentParams>,
) -> Result<Response, AppError> {
    run(ctx, session_id, request_id, asset_id, params).await
}

async fn run(
    ctx: AppContext,
    session_id: SessionId,
    request_id: RequestId,
    asset_id: String,
    params: SegmentParams,
) -> Result<Response, AppError> {
    let asset_id = AssetId::parse(asset_id).for_request(&request_id)?;
    let intent = params.intent().for_request(&request_id)?;
    let request = ExtractRequest {
        asset_id,
        range: params.range_spec(),
        intent,
        stream: params.stream.unwrap_or(false),
    };

    // If the client disconnects, axum drops this future and everything it
    // owns; the token additionally ties the encode to server shutdown.
    let cancel = ctx.shutdown.child_token();
    let extracted = extract_segment(&ctx, session_id, request, cancel)
        .await
        .for_request(&request_id)?;

    match extracted {
        Extracted::Streamed {
            body,
            mode,
            file_name,
            ..
        } => {
            let attachment = (intent == DeliveryIntent::Download).then_some(file_name.as_str());
            Ok(delivery::stream_encoder_output(body, mode, attachment))
        }
        Extracted::File {
            path,
            mode,
            file_name,
            ..
        } => delivery::serve_temp_file(path, &file_name, mode)
            .await
            .for_request(&request_id),
        Extracted::Preview(handle) => {
            let created = PreviewCreated::from(handle.as_ref());
            let location = created.url.clone();
            Ok((
                StatusCode::CREATED,
                [(header::LOCATION, location)],
                Json(created),
            )
                .into_response())
        }
    }
}

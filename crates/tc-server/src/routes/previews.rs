//! Preview retrieval and eviction route handlers.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::Extension;
use serde::Deserialize;

use tc_core::{Error, PreviewId, SessionId};

use crate::context::AppContext;
use crate::delivery;
use crate::error::{AppError, ForRequest};
use crate::middleware::request_id::RequestId;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PreviewQuery {
    /// Serve as an attachment instead of inline.
    pub download: bool,
}

/// Unparseable ids cannot name a preview.
fn parse_id(raw: &str) -> tc_core::Result<PreviewId> {
    raw.parse().map_err(|_| Error::not_found("preview", raw))
}

/// GET /api/previews/{preview_id}
pub async fn get_preview(
    State(ctx): State<AppContext>,
    Extension(session_id): Extension<SessionId>,
    Extension(request_id): Extension<RequestId>,
    Path(preview_id): Path<String>,
    Query(query): Query<PreviewQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let id = parse_id(&preview_id).for_request(&request_id)?;
    let handle = ctx.previews.get(id, session_id).for_request(&request_id)?;
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());

    delivery::serve_preview(handle, range, query.download)
        .await
        .for_request(&request_id)
}

/// DELETE /api/previews/{preview_id}
pub async fn delete_preview(
    State(ctx): State<AppContext>,
    Extension(session_id): Extension<SessionId>,
    Extension(request_id): Extension<RequestId>,
    Path(preview_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&preview_id).for_request(&request_id)?;
    ctx.previews.evict(id, session_id).for_request(&request_id)?;
    Ok(StatusCode::NO_CONTENT)
}

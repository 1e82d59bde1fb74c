//! Admin status and tools route handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use tc_av::{GateStats, ToolInfo};
use tc_core::Error;

use crate::context::AppContext;
use crate::error::AppError;

/// Runtime occupancy snapshot.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub gate: GateStats,
    pub previews: usize,
    pub sessions: usize,
}

/// GET /api/admin/status
pub async fn status(State(ctx): State<AppContext>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        gate: ctx.gate().stats(),
        previews: ctx.previews.len(),
        sessions: ctx.sessions.len(),
    })
}

/// GET /api/admin/tools
pub async fn tools(State(ctx): State<AppContext>) -> Result<Json<Vec<ToolInfo>>, AppError> {
    let tools = ctx.tools.clone();
    let infos = tokio::task::spawn_blocking(move || tools.check_all())
        .await
        .map_err(|e| Error::Internal(format!("tool check failed: {e}")))?;
    Ok(Json(infos))
}

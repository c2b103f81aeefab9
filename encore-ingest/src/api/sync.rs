//! Bulk refresh API
//!
//! POST /sync/bulk runs synchronously and returns the run report.

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::services::{BulkSyncReport, SyncMode};
use crate::AppState;

/// Upper bound on artists per request
const MAX_BULK_LIMIT: usize = 500;

/// POST /sync/bulk request; an empty body refreshes the configured batch in full mode
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BulkSyncRequest {
    pub limit: Option<usize>,
    pub mode: SyncMode,
}

/// POST /sync/bulk
pub async fn bulk_sync(
    State(state): State<AppState>,
    request: Option<Json<BulkSyncRequest>>,
) -> ApiResult<Json<BulkSyncReport>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let limit = request
        .limit
        .unwrap_or(state.coordinator.settings().sync_batch_limit);

    if limit == 0 || limit > MAX_BULK_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_BULK_LIMIT
        )));
    }

    let report = state.coordinator.bulk_sync(limit, request.mode).await?;

    if let Some(reason) = &report.aborted {
        *state.last_error.write().await = Some(reason.clone());
    }

    Ok(Json(report))
}

/// Build bulk sync routes
pub fn sync_routes() -> Router<AppState> {
    Router::new().route("/sync/bulk", post(bulk_sync))
}

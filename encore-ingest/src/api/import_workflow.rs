//! Import workflow API handlers
//!
//! POST /import/start, GET /import/status/{job_id}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use encore_common::events::{ImportPhase, JobStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{IdentityKey, ImportCounts, PhaseError};
use crate::AppState;

/// POST /import/start request
///
/// `identity` is `"<source>:<id>"` or `{"source": ..., "id": ...}`.
#[derive(Debug, Deserialize)]
pub struct StartImportRequest {
    #[serde(alias = "identity_key")]
    pub identity: serde_json::Value,
}

/// POST /import/start response
#[derive(Debug, Serialize)]
pub struct StartImportResponse {
    pub job_id: Uuid,
    pub artist_id: Uuid,
    pub slug: String,
    pub artist_name: String,
    pub is_new_artist: bool,
    pub already_running: bool,
}

/// GET /import/status response
#[derive(Debug, Serialize)]
pub struct ImportStatusResponse {
    pub job_id: Uuid,
    pub identity: IdentityKey,
    pub artist_id: Option<Uuid>,
    pub status: JobStatus,
    pub current_phase: ImportPhase,
    pub percentage: f64,
    pub counts: ImportCounts,
    pub error: Option<String>,
    pub phase_errors: Vec<PhaseError>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: u64,
}

/// POST /import/start
///
/// Bootstraps the artist and schedules the background phases. Returns
/// 202 Accepted for a new job, 200 OK when a job for the identity is already
/// running, 404 when the catalog does not know the identity.
pub async fn start_import(
    State(state): State<AppState>,
    Json(request): Json<StartImportRequest>,
) -> ApiResult<(StatusCode, Json<StartImportResponse>)> {
    let identity: IdentityKey = serde_json::from_value(request.identity)
        .map_err(|e| ApiError::BadRequest(format!("Invalid identity key: {}", e)))?;

    let outcome = match state.coordinator.start(identity.clone()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if e.is_fatal() {
                *state.last_error.write().await = Some(e.to_string());
            }
            return Err(e.into());
        }
    };

    tracing::info!(
        job_id = %outcome.job_id,
        artist_id = %outcome.artist_id,
        identity = %identity,
        already_running = outcome.already_running,
        "Import start request handled"
    );

    let status = if outcome.already_running {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };

    Ok((
        status,
        Json(StartImportResponse {
            job_id: outcome.job_id,
            artist_id: outcome.artist_id,
            slug: outcome.slug,
            artist_name: outcome.artist_name,
            is_new_artist: outcome.is_new_artist,
            already_running: outcome.already_running,
        }),
    ))
}

/// GET /import/status/{job_id}
pub async fn get_import_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<ImportStatusResponse>> {
    let job = state.coordinator.get_status(job_id).await?;

    tracing::debug!(job_id = %job_id, status = %job.status, "Status query");

    let end = job.completed_at.unwrap_or_else(Utc::now);
    let elapsed_seconds = end.signed_duration_since(job.started_at).num_seconds().max(0) as u64;

    Ok(Json(ImportStatusResponse {
        job_id: job.id,
        identity: job.identity_key,
        artist_id: job.artist_id,
        status: job.status,
        current_phase: job.current_phase,
        percentage: job.percentage,
        counts: job.counts,
        error: job.error_detail,
        phase_errors: job.phase_errors,
        started_at: job.started_at,
        completed_at: job.completed_at,
        elapsed_seconds,
    }))
}

/// Build import workflow routes
pub fn import_routes() -> Router<AppState> {
    Router::new()
        .route("/import/start", post(start_import))
        .route("/import/status/:job_id", get(get_import_status))
}

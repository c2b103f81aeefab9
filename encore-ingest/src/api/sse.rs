//! Server-Sent Events (SSE) for import progress streaming
//!
//! GET /import/events/{job_id} replays the job's progress log after the
//! client's last seen sequence, then follows it live until the terminal
//! event. Each SSE `id:` is the event sequence, so a reconnecting browser
//! resumes through `Last-Event-ID`.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::sse::{Event, Sse},
};
use encore_common::sse::{heartbeat_keep_alive, json_event};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// SSE event name for progress entries
const PROGRESS_EVENT: &str = "ImportProgress";

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub last_seen: Option<i64>,
}

/// GET /import/events/{job_id}
///
/// `last_seen` in the query takes precedence over the `Last-Event-ID` header.
pub async fn import_event_stream(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let last_seen = match query.last_seen {
        Some(sequence) => sequence,
        None => last_event_id(&headers)?,
    };

    info!(job_id = %job_id, last_seen, "SSE client connected to import progress");

    let events = state.coordinator.progress().subscribe(job_id, last_seen).await?;

    let stream = events.filter_map(|event| async move {
        json_event(PROGRESS_EVENT, Some(event.sequence.to_string()), &event).map(Ok)
    });

    Ok(Sse::new(stream).keep_alive(heartbeat_keep_alive()))
}

/// `Last-Event-ID` as a sequence; absent means from the beginning
fn last_event_id(headers: &HeaderMap) -> ApiResult<i64> {
    let Some(value) = headers.get("last-event-id") else {
        return Ok(0);
    };

    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or_else(|| ApiError::BadRequest("Last-Event-ID must be an integer sequence".to_string()))
}

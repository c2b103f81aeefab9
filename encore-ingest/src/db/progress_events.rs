//! Append-only progress log per import job

use chrono::Utc;
use encore_common::events::{ImportPhase, JobStatus, ProgressEvent};
use encore_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid, settings};
use crate::utils::retry_on_lock;

fn event_from_row(row: &SqliteRow) -> Result<ProgressEvent> {
    let job_id: String = row.get("job_id");
    let phase: String = row.get("phase");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");

    Ok(ProgressEvent {
        job_id: parse_uuid(&job_id, "progress_events.job_id")?,
        sequence: row.get("sequence"),
        phase: phase.parse()?,
        status: status.parse()?,
        percentage: row.get("percentage"),
        message: row.get("message"),
        timestamp: parse_timestamp(&created_at, "progress_events.created_at")?,
    })
}

/// Append an event, assigning the next sequence number
///
/// Sequence assignment and percentage clamping happen in one statement, so
/// concurrent appenders can neither reuse a sequence nor move the percentage
/// backwards.
pub async fn append(
    pool: &SqlitePool,
    job_id: Uuid,
    phase: ImportPhase,
    status: JobStatus,
    percentage: f64,
    message: &str,
) -> Result<ProgressEvent> {
    let timestamp = Utc::now();
    let max_wait_ms = settings::get_max_lock_wait_ms(pool).await;

    let row = retry_on_lock("append_progress_event", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO progress_events (job_id, sequence, phase, status, percentage, message, created_at)
            SELECT ?1, COALESCE(MAX(sequence), 0) + 1, ?2, ?3,
                   MAX(?4, COALESCE(MAX(percentage), 0.0)), ?5, ?6
            FROM progress_events
            WHERE job_id = ?1
            RETURNING sequence, percentage
            "#,
        )
        .bind(job_id.to_string())
        .bind(phase.as_str())
        .bind(status.as_str())
        .bind(percentage.clamp(0.0, 100.0))
        .bind(message)
        .bind(timestamp.to_rfc3339())
        .fetch_one(pool)
        .await
        .map_err(Error::Database)
    })
    .await?;

    Ok(ProgressEvent {
        job_id,
        sequence: row.get("sequence"),
        phase,
        status,
        percentage: row.get("percentage"),
        message: message.to_string(),
        timestamp,
    })
}

/// Events with sequence greater than `after_sequence`, in order
pub async fn load_since(pool: &SqlitePool, job_id: Uuid, after_sequence: i64) -> Result<Vec<ProgressEvent>> {
    let rows = sqlx::query(
        r#"
        SELECT job_id, sequence, phase, status, percentage, message, created_at
        FROM progress_events
        WHERE job_id = ? AND sequence > ?
        ORDER BY sequence ASC
        "#,
    )
    .bind(job_id.to_string())
    .bind(after_sequence)
    .fetch_all(pool)
    .await?;

    rows.iter().map(event_from_row).collect()
}

pub async fn last_event(pool: &SqlitePool, job_id: Uuid) -> Result<Option<ProgressEvent>> {
    let row = sqlx::query(
        r#"
        SELECT job_id, sequence, phase, status, percentage, message, created_at
        FROM progress_events
        WHERE job_id = ?
        ORDER BY sequence DESC
        LIMIT 1
        "#,
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(event_from_row).transpose()
}

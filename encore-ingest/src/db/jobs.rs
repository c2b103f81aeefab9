//! Import job persistence and execution leases
//!
//! The `import_jobs` row is the single source of truth for a job. Background
//! runners hold a time-bounded lease (`lease_owner`, `lease_expires_at` in
//! epoch milliseconds) so that at most one runner advances a job at a time.

use chrono::Utc;
use encore_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid, settings};
use crate::models::{IdentityKey, ImportCounts, ImportJob, PhaseCursor, PhaseError};
use crate::utils::retry_on_lock;

const JOB_COLUMNS: &str = "id, identity_key, artist_id, status, current_phase, percentage, \
     shows_imported, venues_imported, songs_imported, error_detail, phase_errors, cursor, \
     started_at, completed_at";

const ACTIVE_FILTER: &str = "status NOT IN ('completed', 'failed', 'partial_failure')";

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn job_from_row(row: &SqliteRow) -> Result<ImportJob> {
    let id: String = row.get("id");
    let identity_key: String = row.get("identity_key");
    let artist_id: Option<String> = row.get("artist_id");
    let status: String = row.get("status");
    let current_phase: String = row.get("current_phase");
    let phase_errors: String = row.get("phase_errors");
    let cursor: Option<String> = row.get("cursor");
    let started_at: String = row.get("started_at");
    let completed_at: Option<String> = row.get("completed_at");

    let phase_errors: Vec<PhaseError> = serde_json::from_str(&phase_errors)
        .map_err(|e| Error::Internal(format!("Failed to deserialize phase_errors: {}", e)))?;
    let cursor: Option<PhaseCursor> = cursor
        .map(|c| serde_json::from_str(&c))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to deserialize cursor: {}", e)))?;

    Ok(ImportJob {
        id: parse_uuid(&id, "import_jobs.id")?,
        identity_key: identity_key
            .parse::<IdentityKey>()
            .map_err(|e| Error::Internal(format!("Invalid identity_key: {}", e)))?,
        artist_id: artist_id
            .map(|a| parse_uuid(&a, "import_jobs.artist_id"))
            .transpose()?,
        status: status.parse()?,
        current_phase: current_phase.parse()?,
        percentage: row.get("percentage"),
        counts: ImportCounts {
            shows: row.get::<i64, _>("shows_imported") as usize,
            venues: row.get::<i64, _>("venues_imported") as usize,
            songs: row.get::<i64, _>("songs_imported") as usize,
        },
        error_detail: row.get("error_detail"),
        phase_errors,
        cursor,
        started_at: parse_timestamp(&started_at, "import_jobs.started_at")?,
        completed_at: completed_at
            .map(|c| parse_timestamp(&c, "import_jobs.completed_at"))
            .transpose()?,
    })
}

/// Insert a new job, or return the identity's already-active job
///
/// Returns `(job, created)`. The partial unique index on `identity_key`
/// guarantees a single active job per identity across concurrent callers.
pub async fn insert_job_or_get_active(pool: &SqlitePool, job: &ImportJob) -> Result<(ImportJob, bool)> {
    // An active job may finish between the conflict and the lookup; retry once
    for _ in 0..2 {
        let result = sqlx::query(
            r#"
            INSERT INTO import_jobs (
                id, identity_key, artist_id, status, current_phase, percentage, started_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.identity_key.to_string())
        .bind(job.artist_id.map(|id| id.to_string()))
        .bind(job.status.as_str())
        .bind(job.current_phase.as_str())
        .bind(job.percentage)
        .bind(job.started_at.to_rfc3339())
        .execute(pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok((job.clone(), true));
        }

        if let Some(active) = load_active_for_identity(pool, &job.identity_key).await? {
            return Ok((active, false));
        }
    }

    Err(Error::Internal(format!(
        "Could not create or find an active import job for {}",
        job.identity_key
    )))
}

pub async fn load_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<ImportJob>> {
    let sql = format!("SELECT {} FROM import_jobs WHERE id = ?", JOB_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

pub async fn load_active_for_identity(
    pool: &SqlitePool,
    identity: &IdentityKey,
) -> Result<Option<ImportJob>> {
    let sql = format!(
        "SELECT {} FROM import_jobs WHERE identity_key = ? AND {}",
        JOB_COLUMNS, ACTIVE_FILTER
    );
    let row = sqlx::query(&sql)
        .bind(identity.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Whether any non-terminal job targets the artist
pub async fn has_active_job_for_artist(pool: &SqlitePool, artist_id: Uuid) -> Result<bool> {
    let sql = format!(
        "SELECT COUNT(*) FROM import_jobs WHERE artist_id = ? AND {}",
        ACTIVE_FILTER
    );
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(artist_id.to_string())
        .fetch_one(pool)
        .await?;

    Ok(count > 0)
}

/// Persist job state
///
/// Returns `false` when the stored job is already terminal; a finished job is
/// never overwritten. The stored percentage only moves up. Retries on lock
/// contention up to the `max_lock_wait_ms` setting.
pub async fn save_job(pool: &SqlitePool, job: &ImportJob) -> Result<bool> {
    // Prepare all data before touching the database
    let job_id = job.id.to_string();
    let artist_id = job.artist_id.map(|id| id.to_string());
    let phase_errors = serde_json::to_string(&job.phase_errors)
        .map_err(|e| Error::Internal(format!("Failed to serialize phase_errors: {}", e)))?;
    let cursor = job
        .cursor
        .map(|c| serde_json::to_string(&c))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize cursor: {}", e)))?;
    let completed_at = job.completed_at.map(|dt| dt.to_rfc3339());
    let sql = format!(
        r#"
        UPDATE import_jobs SET
            artist_id = ?,
            status = ?,
            current_phase = ?,
            percentage = MAX(percentage, ?),
            shows_imported = ?,
            venues_imported = ?,
            songs_imported = ?,
            error_detail = ?,
            phase_errors = ?,
            cursor = ?,
            completed_at = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ? AND {}
        "#,
        ACTIVE_FILTER
    );

    let max_wait_ms = settings::get_max_lock_wait_ms(pool).await;

    retry_on_lock("save_job", max_wait_ms, || async {
        let result = sqlx::query(&sql)
            .bind(&artist_id)
            .bind(job.status.as_str())
            .bind(job.current_phase.as_str())
            .bind(job.percentage)
            .bind(job.counts.shows as i64)
            .bind(job.counts.venues as i64)
            .bind(job.counts.songs as i64)
            .bind(&job.error_detail)
            .bind(&phase_errors)
            .bind(&cursor)
            .bind(&completed_at)
            .bind(&job_id)
            .execute(pool)
            .await
            .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    })
    .await
}

/// Take the execution lease if it is free, expired, or already ours
pub async fn try_acquire_lease(
    pool: &SqlitePool,
    job_id: Uuid,
    owner: &str,
    lease: Duration,
) -> Result<bool> {
    let now = now_ms();
    let sql = format!(
        r#"
        UPDATE import_jobs
        SET lease_owner = ?1, lease_expires_at = ?2
        WHERE id = ?3 AND {}
          AND (lease_owner IS NULL OR lease_owner = ?1 OR lease_expires_at < ?4)
        "#,
        ACTIVE_FILTER
    );

    let result = sqlx::query(&sql)
        .bind(owner)
        .bind(now + lease.as_millis() as i64)
        .bind(job_id.to_string())
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Extend a lease we hold; `false` means it was lost to another runner
pub async fn renew_lease(pool: &SqlitePool, job_id: Uuid, owner: &str, lease: Duration) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE import_jobs SET lease_expires_at = ? WHERE id = ? AND lease_owner = ?",
    )
    .bind(now_ms() + lease.as_millis() as i64)
    .bind(job_id.to_string())
    .bind(owner)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn release_lease(pool: &SqlitePool, job_id: Uuid, owner: &str) -> Result<()> {
    sqlx::query(
        "UPDATE import_jobs SET lease_owner = NULL, lease_expires_at = NULL WHERE id = ? AND lease_owner = ?",
    )
    .bind(job_id.to_string())
    .bind(owner)
    .execute(pool)
    .await?;

    Ok(())
}

/// Non-terminal jobs nobody currently holds a live lease on
pub async fn list_recoverable_jobs(pool: &SqlitePool) -> Result<Vec<ImportJob>> {
    let sql = format!(
        "SELECT {} FROM import_jobs WHERE {} \
         AND (lease_owner IS NULL OR lease_expires_at < ?) \
         ORDER BY started_at ASC",
        JOB_COLUMNS, ACTIVE_FILTER
    );
    let rows = sqlx::query(&sql).bind(now_ms()).fetch_all(pool).await?;

    rows.iter().map(job_from_row).collect()
}

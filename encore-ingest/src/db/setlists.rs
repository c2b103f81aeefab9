//! Setlist (voting artifact) database operations

use encore_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::shows;

/// Create an empty placeholder setlist for every show of the artist lacking one
///
/// Returns the number created. Concurrent seeding is safe: `show_id` is unique
/// and conflicts are skipped.
pub async fn seed_placeholders(pool: &SqlitePool, artist_id: Uuid) -> Result<usize> {
    let mut created = 0;

    for show_id in shows::list_without_setlist(pool, artist_id).await? {
        let result = sqlx::query(
            r#"
            INSERT INTO setlists (id, show_id, is_placeholder)
            VALUES (?, ?, 1)
            ON CONFLICT(show_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(show_id.to_string())
        .execute(pool)
        .await?;

        created += result.rows_affected() as usize;
    }

    Ok(created)
}

pub async fn count_for_artist(pool: &SqlitePool, artist_id: Uuid) -> Result<usize> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM setlists l
        JOIN shows s ON s.id = l.show_id
        WHERE s.artist_id = ?
        "#,
    )
    .bind(artist_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count as usize)
}

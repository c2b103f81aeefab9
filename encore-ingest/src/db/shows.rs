//! Show database operations

use encore_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_date, parse_uuid};
use crate::models::Show;

/// Insert a show or refresh the existing row with the same external id
///
/// Returns `(show_id, created)`. An existing show keeps its id and artist; a
/// missing venue in the update does not unlink a known one.
pub async fn upsert_show(pool: &SqlitePool, show: &Show) -> Result<(Uuid, bool)> {
    let show_id = show.id.to_string();
    let venue_id = show.venue_id.map(|id| id.to_string());
    let show_date = show.date.format("%Y-%m-%d").to_string();

    let result = sqlx::query(
        r#"
        INSERT INTO shows (id, external_id, artist_id, venue_id, name, show_date, ticket_url)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(external_id) DO NOTHING
        "#,
    )
    .bind(&show_id)
    .bind(&show.external_id)
    .bind(show.artist_id.to_string())
    .bind(&venue_id)
    .bind(&show.name)
    .bind(&show_date)
    .bind(&show.ticket_url)
    .execute(pool)
    .await?;

    if result.rows_affected() == 1 {
        return Ok((show.id, true));
    }

    let row = sqlx::query(
        r#"
        UPDATE shows
        SET venue_id = COALESCE(?, venue_id),
            name = ?,
            show_date = ?,
            ticket_url = COALESCE(?, ticket_url),
            updated_at = CURRENT_TIMESTAMP
        WHERE external_id = ?
        RETURNING id
        "#,
    )
    .bind(&venue_id)
    .bind(&show.name)
    .bind(&show_date)
    .bind(&show.ticket_url)
    .bind(&show.external_id)
    .fetch_one(pool)
    .await?;

    let id: String = row.get("id");
    Ok((parse_uuid(&id, "shows.id")?, false))
}

pub async fn list_for_artist(pool: &SqlitePool, artist_id: Uuid) -> Result<Vec<Show>> {
    let rows = sqlx::query(
        r#"
        SELECT id, external_id, artist_id, venue_id, name, show_date, ticket_url
        FROM shows
        WHERE artist_id = ?
        ORDER BY show_date ASC
        "#,
    )
    .bind(artist_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let id: String = row.get("id");
            let artist_id: String = row.get("artist_id");
            let venue_id: Option<String> = row.get("venue_id");
            let show_date: String = row.get("show_date");

            Ok(Show {
                id: parse_uuid(&id, "shows.id")?,
                external_id: row.get("external_id"),
                artist_id: parse_uuid(&artist_id, "shows.artist_id")?,
                venue_id: venue_id
                    .map(|v| parse_uuid(&v, "shows.venue_id"))
                    .transpose()?,
                name: row.get("name"),
                date: parse_date(&show_date, "shows.show_date")?,
                ticket_url: row.get("ticket_url"),
            })
        })
        .collect()
}

pub async fn count_for_artist(pool: &SqlitePool, artist_id: Uuid) -> Result<usize> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shows WHERE artist_id = ?")
        .bind(artist_id.to_string())
        .fetch_one(pool)
        .await?;

    Ok(count as usize)
}

/// Shows of an artist that have no setlist yet
pub async fn list_without_setlist(pool: &SqlitePool, artist_id: Uuid) -> Result<Vec<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT s.id FROM shows s
        LEFT JOIN setlists l ON l.show_id = s.id
        WHERE s.artist_id = ? AND l.id IS NULL
        ORDER BY s.show_date ASC
        "#,
    )
    .bind(artist_id.to_string())
    .fetch_all(pool)
    .await?;

    ids.iter().map(|id| parse_uuid(id, "shows.id")).collect()
}

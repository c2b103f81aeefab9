//! Song database operations
//!
//! Songs are unique per (artist_id, recording_id). When a recording is seen
//! again, the stored row is replaced only by a strictly better track: higher
//! popularity, or equal popularity and an earlier release date (unknown dates
//! sort last). Otherwise the first-stored track is kept, except that the
//! stored track itself coming back refreshes the row with its current data.

use encore_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_date, parse_uuid};
use crate::models::Song;

/// Outcome of [`upsert_song`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SongUpsert {
    Inserted,
    /// An existing row for the recording was replaced by a better track or
    /// refreshed from the same track
    Replaced,
    /// The stored track ranks at least as high; nothing written
    Kept,
}

pub async fn upsert_song(pool: &SqlitePool, song: &Song) -> Result<SongUpsert> {
    let song_id = song.id.to_string();
    let release_date = song.release_date.map(|d| d.format("%Y-%m-%d").to_string());

    let returned: Option<String> = sqlx::query_scalar(
        r#"
        INSERT INTO songs (
            id, artist_id, recording_id, external_track_id, title, album_name,
            popularity, liveness, release_date, duration_ms
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(artist_id, recording_id) DO UPDATE SET
            external_track_id = excluded.external_track_id,
            title = excluded.title,
            album_name = excluded.album_name,
            popularity = excluded.popularity,
            liveness = excluded.liveness,
            release_date = excluded.release_date,
            duration_ms = excluded.duration_ms,
            updated_at = CURRENT_TIMESTAMP
        WHERE excluded.external_track_id = songs.external_track_id
           OR excluded.popularity > songs.popularity
           OR (excluded.popularity = songs.popularity
               AND COALESCE(excluded.release_date, '9999-12-31')
                   < COALESCE(songs.release_date, '9999-12-31'))
        RETURNING id
        "#,
    )
    .bind(&song_id)
    .bind(song.artist_id.to_string())
    .bind(&song.recording_id)
    .bind(&song.external_track_id)
    .bind(&song.title)
    .bind(&song.album_name)
    .bind(song.popularity)
    .bind(song.liveness)
    .bind(&release_date)
    .bind(song.duration_ms)
    .fetch_optional(pool)
    .await?;

    Ok(match returned {
        Some(id) if id == song_id => SongUpsert::Inserted,
        Some(_) => SongUpsert::Replaced,
        None => SongUpsert::Kept,
    })
}

pub async fn list_for_artist(pool: &SqlitePool, artist_id: Uuid) -> Result<Vec<Song>> {
    let rows = sqlx::query(
        r#"
        SELECT id, artist_id, recording_id, external_track_id, title, album_name,
               popularity, liveness, release_date, duration_ms
        FROM songs
        WHERE artist_id = ?
        ORDER BY popularity DESC, title ASC
        "#,
    )
    .bind(artist_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let id: String = row.get("id");
            let artist_id: String = row.get("artist_id");
            let release_date: Option<String> = row.get("release_date");

            Ok(Song {
                id: parse_uuid(&id, "songs.id")?,
                artist_id: parse_uuid(&artist_id, "songs.artist_id")?,
                recording_id: row.get("recording_id"),
                external_track_id: row.get("external_track_id"),
                title: row.get("title"),
                album_name: row.get("album_name"),
                popularity: row.get("popularity"),
                liveness: row.get("liveness"),
                release_date: release_date
                    .map(|d| parse_date(&d, "songs.release_date"))
                    .transpose()?,
                duration_ms: row.get("duration_ms"),
            })
        })
        .collect()
}

pub async fn count_for_artist(pool: &SqlitePool, artist_id: Uuid) -> Result<usize> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM songs WHERE artist_id = ?")
        .bind(artist_id.to_string())
        .fetch_one(pool)
        .await?;

    Ok(count as usize)
}

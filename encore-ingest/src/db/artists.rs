//! Artist database operations

use chrono::Utc;
use encore_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::models::{Artist, ArtistImportStatus, CatalogSource, IdentityKey};
use crate::utils::slug_candidates;

/// Slug suffixes tried before giving up on an insert
const MAX_SLUG_ATTEMPTS: usize = 50;

const ARTIST_COLUMNS: &str = "id, event_catalog_id, music_catalog_id, name, slug, image_url, \
     genres, popularity, import_status, last_synced_at";

fn catalog_column(source: CatalogSource) -> &'static str {
    match source {
        CatalogSource::Event => "event_catalog_id",
        CatalogSource::Music => "music_catalog_id",
    }
}

fn artist_from_row(row: &SqliteRow) -> Result<Artist> {
    let id: String = row.get("id");
    let genres: String = row.get("genres");
    let import_status: String = row.get("import_status");
    let last_synced_at: Option<String> = row.get("last_synced_at");

    Ok(Artist {
        id: parse_uuid(&id, "artists.id")?,
        event_catalog_id: row.get("event_catalog_id"),
        music_catalog_id: row.get("music_catalog_id"),
        name: row.get("name"),
        slug: row.get("slug"),
        image_url: row.get("image_url"),
        genres: serde_json::from_str(&genres)
            .map_err(|e| Error::Internal(format!("Failed to deserialize genres: {}", e)))?,
        popularity: row.get("popularity"),
        import_status: import_status.parse()?,
        last_synced_at: last_synced_at
            .map(|s| parse_timestamp(&s, "artists.last_synced_at"))
            .transpose()?,
    })
}

/// Find the artist carrying an external identity
pub async fn find_by_identity(pool: &SqlitePool, identity: &IdentityKey) -> Result<Option<Artist>> {
    let sql = format!(
        "SELECT {} FROM artists WHERE {} = ?",
        ARTIST_COLUMNS,
        catalog_column(identity.source())
    );

    let row = sqlx::query(&sql)
        .bind(identity.external_id())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(artist_from_row).transpose()
}

pub async fn load_artist(pool: &SqlitePool, artist_id: Uuid) -> Result<Option<Artist>> {
    let sql = format!("SELECT {} FROM artists WHERE id = ?", ARTIST_COLUMNS);

    let row = sqlx::query(&sql)
        .bind(artist_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(artist_from_row).transpose()
}

/// Insert an artist, or return the row that already carries `identity`
///
/// Returns `(artist, created)`. A slug taken by a different artist is retried
/// with `-2`, `-3`, … suffixes. Safe under concurrent callers: the unique
/// constraints decide the winner and every loser reads the winner's row.
pub async fn insert_or_get_artist(
    pool: &SqlitePool,
    artist: &Artist,
    identity: &IdentityKey,
) -> Result<(Artist, bool)> {
    let genres = serde_json::to_string(&artist.genres)
        .map_err(|e| Error::Internal(format!("Failed to serialize genres: {}", e)))?;

    for slug in slug_candidates(&artist.slug).take(MAX_SLUG_ATTEMPTS) {
        let result = sqlx::query(
            r#"
            INSERT INTO artists (
                id, event_catalog_id, music_catalog_id, name, slug, image_url,
                genres, popularity, import_status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(artist.id.to_string())
        .bind(&artist.event_catalog_id)
        .bind(&artist.music_catalog_id)
        .bind(&artist.name)
        .bind(&slug)
        .bind(&artist.image_url)
        .bind(&genres)
        .bind(artist.popularity)
        .bind(artist.import_status.as_str())
        .execute(pool)
        .await?;

        if result.rows_affected() == 1 {
            let mut created = artist.clone();
            created.slug = slug;
            return Ok((created, true));
        }

        // Conflict: either the identity already exists or the slug is taken
        if let Some(existing) = find_by_identity(pool, identity).await? {
            return Ok((existing, false));
        }

        tracing::debug!(slug = %slug, "Artist slug taken, trying next suffix");
    }

    Err(Error::Internal(format!(
        "No free slug for artist '{}' after {} attempts",
        artist.name, MAX_SLUG_ATTEMPTS
    )))
}

/// Store a resolved catalog id on an artist that has none for that catalog
///
/// Returns `false` when the artist already has one or another artist owns the id.
pub async fn set_catalog_id(
    pool: &SqlitePool,
    artist_id: Uuid,
    source: CatalogSource,
    external_id: &str,
) -> Result<bool> {
    let column = catalog_column(source);
    let sql = format!(
        "UPDATE OR IGNORE artists SET {col} = ?, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND {col} IS NULL",
        col = column
    );

    let result = sqlx::query(&sql)
        .bind(external_id)
        .bind(artist_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Set import status; `synced` also stamps `last_synced_at`
pub async fn update_import_status(
    pool: &SqlitePool,
    artist_id: Uuid,
    status: ArtistImportStatus,
    synced: bool,
) -> Result<()> {
    let synced_at = synced.then(|| Utc::now().to_rfc3339());

    sqlx::query(
        r#"
        UPDATE artists
        SET import_status = ?,
            last_synced_at = COALESCE(?, last_synced_at),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(synced_at)
    .bind(artist_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Stamp `last_synced_at` without touching the import status
pub async fn mark_synced(pool: &SqlitePool, artist_id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE artists SET last_synced_at = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(artist_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Artists for a bulk refresh: never-synced first, then least recently synced
pub async fn list_for_sync(pool: &SqlitePool, limit: usize) -> Result<Vec<Artist>> {
    let sql = format!(
        "SELECT {} FROM artists \
         ORDER BY last_synced_at IS NOT NULL, last_synced_at ASC, created_at ASC \
         LIMIT ?",
        ARTIST_COLUMNS
    );

    let rows = sqlx::query(&sql)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

    rows.iter().map(artist_from_row).collect()
}

pub async fn count_artists(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artists")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

//! Venue database operations

use encore_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::parse_uuid;
use crate::models::{Venue, PLACEHOLDER_VENUE_NAME};

/// Insert or update a venue, returning the stored row's id
///
/// Venues with an external id are deduplicated on it; a placeholder name never
/// replaces a real one. Venues without an external id are matched on slug and
/// city.
pub async fn upsert_venue(pool: &SqlitePool, venue: &Venue) -> Result<Uuid> {
    match &venue.external_id {
        Some(external_id) => {
            let row = sqlx::query(
                r#"
                INSERT INTO venues (id, external_id, name, slug, city, region, country)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(external_id) DO UPDATE SET
                    name = CASE WHEN excluded.name = ?8 THEN venues.name ELSE excluded.name END,
                    slug = CASE WHEN excluded.name = ?8 THEN venues.slug ELSE excluded.slug END,
                    city = COALESCE(excluded.city, venues.city),
                    region = COALESCE(excluded.region, venues.region),
                    country = COALESCE(excluded.country, venues.country),
                    updated_at = CURRENT_TIMESTAMP
                RETURNING id
                "#,
            )
            .bind(venue.id.to_string())
            .bind(external_id)
            .bind(&venue.name)
            .bind(&venue.slug)
            .bind(&venue.city)
            .bind(&venue.region)
            .bind(&venue.country)
            .bind(PLACEHOLDER_VENUE_NAME)
            .fetch_one(pool)
            .await?;

            let id: String = row.get("id");
            parse_uuid(&id, "venues.id")
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO venues (id, external_id, name, slug, city, region, country)
                VALUES (?, NULL, ?, ?, ?, ?, ?)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(venue.id.to_string())
            .bind(&venue.name)
            .bind(&venue.slug)
            .bind(&venue.city)
            .bind(&venue.region)
            .bind(&venue.country)
            .execute(pool)
            .await?;

            let id: String = sqlx::query_scalar(
                r#"
                SELECT id FROM venues
                WHERE external_id IS NULL AND slug = ? AND COALESCE(city, '') = COALESCE(?, '')
                "#,
            )
            .bind(&venue.slug)
            .bind(&venue.city)
            .fetch_one(pool)
            .await?;

            parse_uuid(&id, "venues.id")
        }
    }
}

pub async fn load_venue(pool: &SqlitePool, venue_id: Uuid) -> Result<Option<Venue>> {
    let row = sqlx::query(
        "SELECT id, external_id, name, slug, city, region, country FROM venues WHERE id = ?",
    )
    .bind(venue_id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let id: String = row.get("id");
            Ok(Some(Venue {
                id: parse_uuid(&id, "venues.id")?,
                external_id: row.get("external_id"),
                name: row.get("name"),
                slug: row.get("slug"),
                city: row.get("city"),
                region: row.get("region"),
                country: row.get("country"),
            }))
        }
        None => Ok(None),
    }
}

/// Distinct venues linked to an artist's shows
pub async fn count_for_artist(pool: &SqlitePool, artist_id: Uuid) -> Result<usize> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT venue_id) FROM shows WHERE artist_id = ? AND venue_id IS NOT NULL",
    )
    .bind(artist_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count as usize)
}

//! Catalog entities written by the import pipeline

use chrono::{DateTime, NaiveDate, Utc};
use encore_common::events::JobStatus;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::identity::{CatalogSource, IdentityKey};

/// Venue name used when the event catalog supplies an incomplete venue
pub const PLACEHOLDER_VENUE_NAME: &str = "Venue TBA";

/// Artist-level import state, shown on artist pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtistImportStatus {
    /// Bootstrapped; background phases not finished yet
    Importing,
    /// All phases succeeded
    Complete,
    /// Shows or catalog import failed; partial data available
    Partial,
    /// Import aborted (configuration error)
    Failed,
}

impl ArtistImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtistImportStatus::Importing => "importing",
            ArtistImportStatus::Complete => "complete",
            ArtistImportStatus::Partial => "partial",
            ArtistImportStatus::Failed => "failed",
        }
    }

    /// Artist outcome of a finished job; `None` while the job is running
    pub fn for_job(status: JobStatus) -> Option<Self> {
        match status {
            JobStatus::Completed => Some(ArtistImportStatus::Complete),
            JobStatus::PartialFailure => Some(ArtistImportStatus::Partial),
            JobStatus::Failed => Some(ArtistImportStatus::Failed),
            _ => None,
        }
    }
}

impl FromStr for ArtistImportStatus {
    type Err = encore_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            // Rows created outside the pipeline default to 'pending'
            "importing" | "pending" => Ok(ArtistImportStatus::Importing),
            "complete" => Ok(ArtistImportStatus::Complete),
            "partial" => Ok(ArtistImportStatus::Partial),
            "failed" => Ok(ArtistImportStatus::Failed),
            other => Err(encore_common::Error::InvalidInput(format!(
                "Unknown artist import status: {}",
                other
            ))),
        }
    }
}

/// Artist record
#[derive(Debug, Clone, Serialize)]
pub struct Artist {
    pub id: Uuid,
    pub event_catalog_id: Option<String>,
    pub music_catalog_id: Option<String>,
    pub name: String,
    pub slug: String,
    pub image_url: Option<String>,
    pub genres: Vec<String>,
    pub popularity: Option<i64>,
    pub import_status: ArtistImportStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Artist {
    /// New artist for an identity key; the key's id fills the matching catalog column
    pub fn new(identity: &IdentityKey, name: String, slug: String) -> Self {
        let (event_catalog_id, music_catalog_id) = match identity.source() {
            CatalogSource::Event => (Some(identity.external_id().to_string()), None),
            CatalogSource::Music => (None, Some(identity.external_id().to_string())),
        };

        Self {
            id: Uuid::new_v4(),
            event_catalog_id,
            music_catalog_id,
            name,
            slug,
            image_url: None,
            genres: Vec::new(),
            popularity: None,
            import_status: ArtistImportStatus::Importing,
            last_synced_at: None,
        }
    }

    /// External id for a catalog, if known
    pub fn catalog_id(&self, source: CatalogSource) -> Option<&str> {
        match source {
            CatalogSource::Event => self.event_catalog_id.as_deref(),
            CatalogSource::Music => self.music_catalog_id.as_deref(),
        }
    }
}

/// Venue record
#[derive(Debug, Clone, Serialize)]
pub struct Venue {
    pub id: Uuid,
    /// Event catalog venue id; `None` when the catalog did not supply one
    pub external_id: Option<String>,
    pub name: String,
    pub slug: String,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
}

/// Show record (one artist performance at one venue on one date)
#[derive(Debug, Clone, Serialize)]
pub struct Show {
    pub id: Uuid,
    pub external_id: String,
    pub artist_id: Uuid,
    pub venue_id: Option<Uuid>,
    pub name: String,
    pub date: NaiveDate,
    pub ticket_url: Option<String>,
}

/// Studio catalog song, unique per (artist_id, recording_id)
#[derive(Debug, Clone, Serialize)]
pub struct Song {
    pub id: Uuid,
    pub artist_id: Uuid,
    /// ISRC or equivalent global recording code
    pub recording_id: String,
    pub external_track_id: Option<String>,
    pub title: String,
    pub album_name: Option<String>,
    pub popularity: i64,
    pub liveness: f64,
    pub release_date: Option<NaiveDate>,
    pub duration_ms: Option<i64>,
}

//! Phase 1: BOOTSTRAP
//!
//! Runs inside the start request. Reuses the artist already linked to the
//! identity, otherwise looks the identity up in its own catalog and inserts
//! the artist. Concurrent bootstraps of one identity converge on a single row.

use encore_common::events::EncoreEvent;
use std::time::Duration;

use super::ImportCoordinator;
use crate::clients::CatalogError;
use crate::db::artists;
use crate::models::{Artist, CatalogSource, IdentityKey};
use crate::services::ImportError;
use crate::utils::{slugify, RetryPolicy};

/// Target wall-clock time from request to artist row
pub(super) const BOOTSTRAP_BUDGET: Duration = Duration::from_millis(200);

/// Profile fields taken from whichever catalog the identity belongs to
struct ArtistProfile {
    name: String,
    image_url: Option<String>,
    genres: Vec<String>,
    popularity: Option<i64>,
}

/// One quick retry; the request is waiting
fn lookup_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_millis(50),
        max_elapsed: Some(BOOTSTRAP_BUDGET),
        ..RetryPolicy::default()
    }
}

impl ImportCoordinator {
    /// Returns the artist and whether this call created it
    pub(super) async fn phase_bootstrap(&self, identity: &IdentityKey) -> Result<(Artist, bool), ImportError> {
        if let Some(artist) = artists::find_by_identity(&self.db, identity).await? {
            tracing::debug!(identity = %identity, artist_id = %artist.id, "Artist already bootstrapped");
            return Ok((artist, false));
        }

        let profile = self.lookup_identity(identity).await?;

        let mut artist = Artist::new(identity, profile.name.clone(), slugify(&profile.name));
        artist.image_url = profile.image_url;
        artist.genres = profile.genres;
        artist.popularity = profile.popularity;

        let (artist, created) = artists::insert_or_get_artist(&self.db, &artist, identity).await?;

        if created {
            tracing::info!(
                identity = %identity,
                artist_id = %artist.id,
                slug = %artist.slug,
                "Artist created"
            );
            self.event_bus.emit_lossy(EncoreEvent::ArtistCreated {
                artist_id: artist.id,
                slug: artist.slug.clone(),
                timestamp: chrono::Utc::now(),
            });
        }

        Ok((artist, created))
    }

    async fn lookup_identity(&self, identity: &IdentityKey) -> Result<ArtistProfile, ImportError> {
        let external_id = identity.external_id();
        let retry = lookup_retry();

        let profile = match identity.source() {
            CatalogSource::Event => retry
                .run("get_attraction", || self.clients.events.get_attraction(external_id))
                .await
                .map_err(lookup_error)?
                .map(|attraction| ArtistProfile {
                    name: attraction.name,
                    image_url: attraction.image_url,
                    genres: attraction.genres,
                    popularity: None,
                }),
            CatalogSource::Music => retry
                .run("get_artist", || self.clients.music.get_artist(external_id))
                .await
                .map_err(lookup_error)?
                .map(|artist| ArtistProfile {
                    name: artist.name,
                    image_url: artist.image_url,
                    genres: artist.genres,
                    popularity: artist.popularity,
                }),
        };

        profile
            .filter(|p| !p.name.trim().is_empty())
            .ok_or_else(|| ImportError::IdentityNotFound {
                catalog: identity.source(),
                external_id: external_id.to_string(),
            })
    }
}

fn lookup_error(err: CatalogError) -> ImportError {
    tracing::warn!(error = %err, "Identity lookup failed");
    ImportError::from_catalog(err)
}

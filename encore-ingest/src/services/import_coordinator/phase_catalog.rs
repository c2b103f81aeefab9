//! Phase 3: STUDIO CATALOG
//!
//! Walks the artist's releases page by page. Track listings are fetched in
//! batches of the executor's concurrency; each batch is filtered for live
//! recordings, deduplicated by recording id and committed before the next
//! batch is fetched, so an interrupted phase keeps everything before it.

use async_stream::stream;
use encore_common::events::ImportPhase;
use futures::{pin_mut, Stream, StreamExt};
use uuid::Uuid;

use super::{ImportCoordinator, PhaseContext, PhaseSummary};
use crate::clients::{Album, AlbumPage, CatalogError, Track};
use crate::db::songs::{self, SongUpsert};
use crate::models::{CatalogSource, PhaseCursor, Song};
use crate::services::{select_studio_tracks, ImportError};

/// Hard stop for very large discographies
const MAX_ALBUM_PAGES: usize = 50;

impl ImportCoordinator {
    pub(super) async fn phase_catalog(&self, ctx: &mut PhaseContext) -> Result<PhaseSummary, ImportError> {
        let phase = ImportPhase::StudioCatalog;
        tracing::info!(artist_id = %ctx.artist.id, "Phase 3: STUDIO CATALOG");

        let music_id = match self.resolve_catalog_id(ctx, CatalogSource::Music).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                self.report(ctx, phase, 1.0, "No music catalog listing; no songs imported")
                    .await?;
                return Ok(PhaseSummary::default());
            }
            Err(e) => return Err(e.into_phase_failure(phase, 0)),
        };

        let start_offset = match ctx.resume_cursor() {
            Some(PhaseCursor::StudioCatalog { next_offset }) => next_offset,
            _ => 0,
        };

        let mut summary = PhaseSummary::default();
        let pages = self.album_pages(&music_id, start_offset);
        pin_mut!(pages);

        while let Some(page) = pages.next().await {
            let (offset, page) =
                page.map_err(|e| ImportError::from_catalog(e).into_phase_failure(phase, summary.items))?;

            for (index, albums) in page.albums.chunks(self.executor.concurrency()).enumerate() {
                if index > 0 {
                    self.executor.pause().await;
                }
                self.import_album_batch(ctx.artist.id, albums, &mut summary)
                    .await
                    .map_err(|e| e.into_phase_failure(phase, summary.items))?;
            }

            let next_offset = page
                .next_offset
                .unwrap_or(offset + page.albums.len() as u32);
            self.checkpoint(ctx, PhaseCursor::StudioCatalog { next_offset })
                .await?;

            let fraction = if page.total == 0 {
                1.0
            } else {
                f64::from(next_offset) / f64::from(page.total)
            };
            self.report(
                ctx,
                phase,
                fraction,
                format!("Imported {} songs from {} releases", summary.items, next_offset),
            )
            .await?;
        }

        self.report(
            ctx,
            phase,
            1.0,
            format!(
                "Imported {} studio songs ({} live recordings filtered)",
                summary.items, summary.filtered
            ),
        )
        .await?;

        Ok(summary)
    }

    /// Release pages from `start_offset` on, fetched lazily with the inter-batch pause
    fn album_pages<'a>(
        &'a self,
        music_id: &'a str,
        start_offset: u32,
    ) -> impl Stream<Item = Result<(u32, AlbumPage), CatalogError>> + Send + 'a {
        stream! {
            let mut offset = Some(start_offset);
            let mut fetched = 0;

            while let Some(current) = offset {
                if fetched == MAX_ALBUM_PAGES {
                    tracing::warn!(music_id, "Release listing truncated to {} pages", MAX_ALBUM_PAGES);
                    break;
                }
                if fetched > 0 {
                    self.executor.pause().await;
                }

                let result = self
                    .executor
                    .call("list_albums_page", || self.clients.music.list_albums_page(music_id, current))
                    .await;
                fetched += 1;

                match result {
                    Ok(page) => {
                        offset = page.next_offset.filter(|next| *next > current);
                        yield Ok((current, page));
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        }
    }

    /// Fetch, filter and commit the tracks of up to `concurrency` releases
    ///
    /// A transient failure on one release still commits the others before the
    /// error is returned. Releases that fail permanently are skipped.
    async fn import_album_batch(
        &self,
        artist_id: Uuid,
        albums: &[Album],
        summary: &mut PhaseSummary,
    ) -> Result<(), ImportError> {
        let listings = self
            .executor
            .run_batch("list_tracks", albums, |album| {
                self.clients.music.list_tracks(&album.external_id)
            })
            .await;

        let mut tracks: Vec<Track> = Vec::new();
        let mut pending_failure: Option<CatalogError> = None;

        for (album, listing) in albums.iter().zip(listings) {
            match listing {
                Ok(album_tracks) => {
                    tracks.extend(album_tracks.into_iter().map(|track| with_album_defaults(track, album)));
                }
                Err(e) if e.is_fatal() => return Err(ImportError::from_catalog(e)),
                Err(e) if e.is_transient() => {
                    tracing::warn!(album_id = %album.external_id, error = %e, "Track listing failed after retries");
                    pending_failure.get_or_insert(e);
                }
                Err(e) => {
                    tracing::warn!(album_id = %album.external_id, error = %e, "Skipping release");
                    summary.skipped += 1;
                }
            }
        }

        let selection = select_studio_tracks(tracks, self.settings.liveness_threshold);
        summary.filtered += selection.live_filtered;
        summary.skipped += selection.missing_recording_id;

        for track in selection.kept {
            let song = song_from_track(artist_id, track);
            match songs::upsert_song(&self.db, &song).await {
                Ok(SongUpsert::Inserted) => summary.items += 1,
                Ok(SongUpsert::Replaced) | Ok(SongUpsert::Kept) => {}
                Err(e) => {
                    tracing::warn!(recording_id = %song.recording_id, error = %e, "Failed to store song");
                    summary.skipped += 1;
                }
            }
        }

        match pending_failure {
            Some(e) => Err(ImportError::from_catalog(e)),
            None => Ok(()),
        }
    }
}

/// Tracks inherit the release's date and name when the listing omits them
fn with_album_defaults(mut track: Track, album: &Album) -> Track {
    if track.release_date.is_none() {
        track.release_date = album.release_date;
    }
    if track.album_name.is_none() {
        track.album_name = Some(album.name.clone());
    }
    track
}

/// Only called for tracks that survived selection, which carry a recording id
fn song_from_track(artist_id: Uuid, track: Track) -> Song {
    Song {
        id: Uuid::new_v4(),
        artist_id,
        recording_id: track.recording_id.unwrap_or_default(),
        external_track_id: Some(track.external_id),
        title: track.title,
        album_name: track.album_name,
        popularity: track.popularity,
        liveness: track.liveness.unwrap_or(0.0),
        release_date: track.release_date,
        duration_ms: track.duration_ms,
    }
}

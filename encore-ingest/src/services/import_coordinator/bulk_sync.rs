//! Bulk refresh of already-imported artists
//!
//! Re-runs the shows and/or catalog phases for the least recently synced
//! artists, one artist at a time, without creating import jobs. Artists with
//! an active import job are skipped. A fatal configuration error stops the
//! run; any other failure is recorded for that artist and the run continues.

use encore_common::events::{EncoreEvent, ImportPhase};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{ImportCoordinator, PhaseContext};
use crate::db::{artists, jobs};
use crate::services::ImportError;

/// Which phases a bulk refresh runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Shows and catalog
    #[default]
    Full,
    Shows,
    Catalog,
}

impl SyncMode {
    fn includes_shows(self) -> bool {
        matches!(self, SyncMode::Full | SyncMode::Shows)
    }

    fn includes_catalog(self) -> bool {
        matches!(self, SyncMode::Full | SyncMode::Catalog)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtistSyncFailure {
    pub artist_id: Uuid,
    pub slug: String,
    pub phase: ImportPhase,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkSyncReport {
    pub mode: SyncMode,
    pub artists_processed: usize,
    /// Artists where at least one phase failed
    pub artists_failed: usize,
    /// Artists skipped because an import job was active
    pub artists_skipped: usize,
    pub shows_imported: usize,
    pub songs_imported: usize,
    pub failures: Vec<ArtistSyncFailure>,
    /// Set when a fatal configuration error ended the run early
    pub aborted: Option<String>,
    pub duration_ms: u64,
}

impl ImportCoordinator {
    /// Refresh up to `limit` artists, least recently synced first
    pub async fn bulk_sync(&self, limit: usize, mode: SyncMode) -> Result<BulkSyncReport, ImportError> {
        let started = Instant::now();
        let candidates = artists::list_for_sync(&self.db, limit).await?;

        tracing::info!(candidates = candidates.len(), limit, mode = ?mode, "Bulk sync started");

        let mut report = BulkSyncReport {
            mode,
            ..Default::default()
        };

        'artists: for artist in candidates {
            if jobs::has_active_job_for_artist(&self.db, artist.id).await? {
                tracing::debug!(artist_id = %artist.id, "Skipping artist with active import");
                report.artists_skipped += 1;
                continue;
            }

            let mut ctx = PhaseContext::for_artist(artist);
            let mut failed = false;

            let phases = [
                (ImportPhase::EventsVenues, mode.includes_shows()),
                (ImportPhase::StudioCatalog, mode.includes_catalog()),
            ];

            for (phase, enabled) in phases {
                if !enabled {
                    continue;
                }

                let artist_id = ctx.artist.id;
                let result = match phase {
                    ImportPhase::EventsVenues => {
                        self.run_timed(phase, artist_id, self.phase_events(&mut ctx)).await
                    }
                    _ => self.run_timed(phase, artist_id, self.phase_catalog(&mut ctx)).await,
                };

                match result {
                    Ok(summary) => match phase {
                        ImportPhase::EventsVenues => report.shows_imported += summary.items,
                        _ => report.songs_imported += summary.items,
                    },
                    Err(e) if e.is_fatal() => {
                        tracing::error!(artist_id = %artist_id, phase = %phase, error = %e, "Bulk sync aborted");
                        report.aborted = Some(e.to_string());
                        report.artists_failed += 1;
                        report.failures.push(ArtistSyncFailure {
                            artist_id,
                            slug: ctx.artist.slug.clone(),
                            phase,
                            message: e.to_string(),
                        });
                        break 'artists;
                    }
                    Err(e) => {
                        tracing::warn!(artist_id = %artist_id, phase = %phase, error = %e, "Bulk sync phase failed");
                        failed = true;
                        report.failures.push(ArtistSyncFailure {
                            artist_id,
                            slug: ctx.artist.slug.clone(),
                            phase,
                            message: e.to_string(),
                        });
                    }
                }
            }

            self.invalidate_artist_cache(&ctx.artist).await;
            artists::mark_synced(&self.db, ctx.artist.id).await?;

            report.artists_processed += 1;
            if failed {
                report.artists_failed += 1;
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            processed = report.artists_processed,
            failed = report.artists_failed,
            skipped = report.artists_skipped,
            shows = report.shows_imported,
            songs = report.songs_imported,
            duration_ms = report.duration_ms,
            "Bulk sync finished"
        );

        self.event_bus.emit_lossy(EncoreEvent::BulkSyncCompleted {
            artists_processed: report.artists_processed,
            artists_failed: report.artists_failed,
            duration_seconds: report.duration_ms / 1000,
            timestamp: chrono::Utc::now(),
        });

        Ok(report)
    }
}

/// Run a full bulk sync every `interval` until `shutdown` is cancelled
///
/// The first run starts one interval after spawning.
pub fn spawn_periodic_sync(
    coordinator: ImportCoordinator,
    interval: Duration,
    limit: usize,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Periodic sync stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = coordinator.bulk_sync(limit, SyncMode::Full).await {
                        tracing::error!(error = %e, "Periodic sync failed");
                    }
                }
            }
        }
    })
}

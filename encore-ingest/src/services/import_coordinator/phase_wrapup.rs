//! Phase 4: WRAP-UP
//!
//! Seeds empty setlists for shows that have none, invalidates the artist's
//! cache tags and finalizes the job. Neither seeding nor invalidation can
//! fail the job: problems are logged and the job is still finalized.

use encore_common::events::{ImportPhase, JobStatus};

use super::{ImportCoordinator, PhaseContext};
use crate::clients::artist_cache_tags;
use crate::db::setlists;
use crate::models::Artist;
use crate::services::ImportError;

impl ImportCoordinator {
    /// Returns the job's final status
    pub(super) async fn phase_wrapup(&self, ctx: &mut PhaseContext) -> Result<JobStatus, ImportError> {
        let phase = ImportPhase::WrapUp;
        tracing::info!(artist_id = %ctx.artist.id, "Phase 4: WRAP-UP");

        match setlists::seed_placeholders(&self.db, ctx.artist.id).await {
            Ok(created) => {
                self.report(ctx, phase, 0.3, format!("Created {} placeholder setlists", created))
                    .await?;
            }
            Err(e) => {
                tracing::warn!(artist_id = %ctx.artist.id, error = %e, "Failed to seed placeholder setlists");
            }
        }

        self.invalidate_artist_cache(&ctx.artist).await;
        self.report(ctx, phase, 0.6, "Invalidated cached artist pages").await?;

        self.refresh_counts(ctx).await?;
        self.finalize(ctx).await
    }

    /// Best-effort cache invalidation for everything showing the artist
    pub(super) async fn invalidate_artist_cache(&self, artist: &Artist) {
        let tags = artist_cache_tags(artist.id, &artist.slug);

        match self.clients.cache.invalidate_tags(&tags).await {
            Ok(()) => tracing::debug!(artist_id = %artist.id, tags = tags.len(), "Cache tags invalidated"),
            Err(e) => tracing::warn!(artist_id = %artist.id, error = %e, "Cache invalidation failed"),
        }
    }

    /// Completed or PartialFailure; a job that is already terminal in the
    /// store keeps its stored state
    async fn finalize(&self, ctx: &mut PhaseContext) -> Result<JobStatus, ImportError> {
        let Some(run) = ctx.run.as_mut() else {
            return Ok(JobStatus::Completed);
        };

        let final_status = if run.job.has_phase_errors() {
            JobStatus::PartialFailure
        } else {
            JobStatus::Completed
        };

        run.job.advance_percentage(100.0);
        run.job.transition_to(final_status);

        if let Some(stored) = self.save_terminal_job(&run.job, ctx.artist.id).await? {
            tracing::warn!(
                job_id = %run.job.id,
                stored_status = %stored,
                "Job already finalized; keeping stored state"
            );
            return Ok(stored);
        }

        let counts = run.job.counts;
        let message = if final_status == JobStatus::PartialFailure {
            let failures: Vec<String> = run
                .job
                .phase_errors
                .iter()
                .map(|e| format!("{} after {} items", e.phase, e.items_imported))
                .collect();
            format!(
                "Import finished with failures ({}): {} shows, {} venues, {} songs",
                failures.join("; "),
                counts.shows,
                counts.venues,
                counts.songs
            )
        } else {
            format!(
                "Import complete: {} shows, {} venues, {} songs",
                counts.shows, counts.venues, counts.songs
            )
        };

        self.progress
            .append(run.job.id, ImportPhase::WrapUp, final_status, 100.0, message)
            .await?;

        Ok(final_status)
    }
}

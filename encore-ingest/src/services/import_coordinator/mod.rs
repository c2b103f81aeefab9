//! Artist import coordinator
//!
//! # State Progression
//! BOOTSTRAPPING → SHOWS_IMPORTING → CATALOG_IMPORTING → WRAPPING_UP → COMPLETED | PARTIAL_FAILURE
//!
//! Bootstrap runs inside the request and returns as soon as the artist row
//! exists. The remaining phases run in a background task holding the job's
//! execution lease:
//!
//! - **Bootstrap** (`phase_bootstrap`): locate or create the artist
//! - **Events & venues** (`phase_events`): upcoming shows and their venues
//! - **Studio catalog** (`phase_catalog`): filtered, deduplicated songs
//! - **Wrap-up** (`phase_wrapup`): placeholder setlists, cache tags, final status
//!
//! A failed shows or catalog phase is recorded and the job moves on; only
//! fatal configuration errors end a job as `Failed`. Every phase write is
//! awaited before the next phase starts, and each phase checkpoints a cursor
//! so a recovered job resumes where the previous runner stopped.

use encore_common::config::PipelineSettings;
use encore_common::events::{EventBus, ImportPhase, JobStatus};
use serde::Serialize;
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::clients::{CacheInvalidator, EventCatalog, MusicCatalog};
use crate::db::{artists, jobs, shows, songs, venues};
use crate::models::{Artist, ArtistImportStatus, CatalogSource, IdentityKey, ImportJob, PhaseCursor};
use crate::services::{BatchExecutor, ImportError, ProgressStream};

mod bulk_sync;
mod phase_bootstrap;
mod phase_catalog;
mod phase_events;
mod phase_wrapup;
mod recovery;

pub use bulk_sync::{spawn_periodic_sync, ArtistSyncFailure, BulkSyncReport, SyncMode};
pub use recovery::spawn_stale_job_sweep;

/// Minimum Jaro-Winkler similarity for a cross-catalog name match
const NAME_MATCH_THRESHOLD: f64 = 0.9;

/// External services used by the pipeline
#[derive(Clone)]
pub struct CatalogClients {
    pub events: Arc<dyn EventCatalog>,
    pub music: Arc<dyn MusicCatalog>,
    pub cache: Arc<dyn CacheInvalidator>,
}

/// Result of [`ImportCoordinator::start`]
#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub job_id: Uuid,
    pub artist_id: Uuid,
    pub slug: String,
    pub artist_name: String,
    /// The bootstrap created the artist row
    pub is_new_artist: bool,
    /// An active job already existed for the identity; no new job was scheduled
    pub already_running: bool,
}

/// Items a background phase wrote or passed over
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PhaseSummary {
    pub items: usize,
    pub venues: usize,
    pub skipped: usize,
    pub filtered: usize,
}

/// A job owned by this runner
struct JobRun {
    job: ImportJob,
    lease_owner: String,
}

/// State shared by the phases of one artist import
///
/// Bulk refreshes run phases without a job; progress is only logged then.
pub(crate) struct PhaseContext {
    artist: Artist,
    run: Option<JobRun>,
}

impl PhaseContext {
    fn for_artist(artist: Artist) -> Self {
        Self { artist, run: None }
    }

    fn resume_cursor(&self) -> Option<PhaseCursor> {
        self.run.as_ref().and_then(|run| run.job.cursor)
    }
}

#[derive(Clone)]
pub struct ImportCoordinator {
    db: SqlitePool,
    event_bus: EventBus,
    progress: ProgressStream,
    clients: CatalogClients,
    executor: BatchExecutor,
    settings: PipelineSettings,
    instance_id: String,
}

impl ImportCoordinator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        clients: CatalogClients,
        settings: PipelineSettings,
    ) -> Self {
        let progress = ProgressStream::new(db.clone(), event_bus.clone());

        Self {
            executor: BatchExecutor::from_settings(&settings),
            db,
            event_bus,
            progress,
            clients,
            settings,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Replace the progress stream (e.g. a shorter poll interval)
    pub fn with_progress_stream(mut self, progress: ProgressStream) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> &ProgressStream {
        &self.progress
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Bootstrap an artist and schedule the background phases
    ///
    /// Idempotent per identity: while a job for the identity is active, the
    /// existing job is returned and nothing new is scheduled. Fails with
    /// `IdentityNotFound` (no job created) when the catalog does not know the id.
    pub async fn start(&self, identity: IdentityKey) -> Result<StartOutcome, ImportError> {
        let started = Instant::now();

        let (artist, is_new_artist) = self.phase_bootstrap(&identity).await?;

        let job = ImportJob::new(identity.clone(), artist.id);
        let (job, created) = jobs::insert_job_or_get_active(&self.db, &job).await?;

        if created {
            self.progress
                .append(
                    job.id,
                    ImportPhase::Bootstrap,
                    JobStatus::Bootstrapping,
                    0.0,
                    format!("Bootstrapped artist '{}'", artist.name),
                )
                .await?;
        }

        let elapsed = started.elapsed();
        if elapsed > phase_bootstrap::BOOTSTRAP_BUDGET {
            tracing::warn!(
                identity = %identity,
                elapsed_ms = elapsed.as_millis() as u64,
                "Bootstrap exceeded latency budget"
            );
        }

        if created {
            tracing::info!(
                job_id = %job.id,
                artist_id = %artist.id,
                identity = %identity,
                elapsed_ms = elapsed.as_millis() as u64,
                "Import job created"
            );
            self.spawn_job(job.id);
        } else {
            tracing::info!(job_id = %job.id, identity = %identity, "Import already running for identity");
        }

        Ok(StartOutcome {
            job_id: job.id,
            artist_id: artist.id,
            slug: artist.slug,
            artist_name: artist.name,
            is_new_artist,
            already_running: !created,
        })
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<ImportJob, ImportError> {
        jobs::load_job(&self.db, job_id)
            .await?
            .ok_or(ImportError::JobNotFound(job_id))
    }

    /// Run a job's background phases on a new task
    ///
    /// A run that stops on a persistence error is retried with backoff; once
    /// the attempts are spent the job is ended as `Failed`.
    pub fn spawn_job(&self, job_id: Uuid) -> JoinHandle<()> {
        let coordinator = self.clone();

        tokio::spawn(async move {
            let policy = coordinator.executor.retry_policy().clone();
            let mut attempt = 0u32;

            loop {
                attempt += 1;

                match coordinator.run_job(job_id).await {
                    Ok(Some(status)) => {
                        tracing::info!(job_id = %job_id, status = %status, "Import job finished");
                        return;
                    }
                    Ok(None) => {
                        tracing::debug!(job_id = %job_id, "Import job held by another runner");
                        return;
                    }
                    Err(e @ (ImportError::LeaseLost(_) | ImportError::JobNotFound(_))) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Import job stopped");
                        return;
                    }
                    Err(e) if attempt < policy.max_attempts => {
                        let delay = policy.backoff_for(attempt);
                        tracing::warn!(
                            job_id = %job_id,
                            attempt,
                            backoff_ms = delay.as_millis() as u64,
                            error = %e,
                            "Import job interrupted, will resume after backoff"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => {
                        tracing::error!(job_id = %job_id, attempt, error = %e, "Import job stopped");
                        if let Err(abandon_err) = coordinator.abandon_job(job_id, &e).await {
                            tracing::error!(
                                job_id = %job_id,
                                error = %abandon_err,
                                "Failed to record import job failure"
                            );
                        }
                        return;
                    }
                }
            }
        })
    }

    /// End a job that cannot be driven further as `Failed`
    ///
    /// Takes the lease first; a job another runner picked up is left alone.
    async fn abandon_job(&self, job_id: Uuid, cause: &ImportError) -> Result<(), ImportError> {
        let owner = format!("{}/{}", self.instance_id, Uuid::new_v4());
        if !jobs::try_acquire_lease(&self.db, job_id, &owner, self.settings.lease_duration()).await? {
            return Ok(());
        }

        let result = self.record_abandoned(job_id, cause).await;

        if let Err(e) = jobs::release_lease(&self.db, job_id, &owner).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to release job lease");
        }

        result
    }

    async fn record_abandoned(&self, job_id: Uuid, cause: &ImportError) -> Result<(), ImportError> {
        let Some(mut job) = jobs::load_job(&self.db, job_id).await? else {
            return Ok(());
        };
        if job.is_terminal() {
            return Ok(());
        }

        let phase = job.current_phase;
        let message = format!("Import stopped during {} phase: {}", phase, cause);
        job.error_detail = Some(message.clone());
        job.transition_to(JobStatus::Failed);
        let saved = match job.artist_id {
            Some(artist_id) => self.save_terminal_job(&job, artist_id).await?.is_none(),
            None => jobs::save_job(&self.db, &job).await?,
        };
        if !saved {
            return Ok(());
        }

        self.progress
            .append(job.id, phase, JobStatus::Failed, job.percentage, message)
            .await?;

        Ok(())
    }

    /// Drive a job to a terminal state under its execution lease
    ///
    /// Returns `Ok(None)` when another runner holds a live lease.
    pub async fn run_job(&self, job_id: Uuid) -> Result<Option<JobStatus>, ImportError> {
        let owner = format!("{}/{}", self.instance_id, Uuid::new_v4());

        if !jobs::try_acquire_lease(&self.db, job_id, &owner, self.settings.lease_duration()).await? {
            return Ok(None);
        }

        let result = self.drive_job(job_id, &owner).await;

        if let Err(e) = jobs::release_lease(&self.db, job_id, &owner).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to release job lease");
        }

        result.map(Some)
    }

    /// Restart jobs left unfinished by a previous process
    pub async fn recover_stale_jobs(&self) -> Result<usize, ImportError> {
        let stale = jobs::list_recoverable_jobs(&self.db).await?;

        for job in &stale {
            tracing::info!(
                job_id = %job.id,
                status = %job.status,
                percentage = job.percentage,
                "Resuming interrupted import job"
            );
            self.spawn_job(job.id);
        }

        Ok(stale.len())
    }

    async fn drive_job(&self, job_id: Uuid, owner: &str) -> Result<JobStatus, ImportError> {
        let job = jobs::load_job(&self.db, job_id)
            .await?
            .ok_or(ImportError::JobNotFound(job_id))?;
        let artist_id = job.artist_id.ok_or_else(|| {
            encore_common::Error::Internal(format!("Import job {} has no artist", job_id))
        })?;
        let artist = artists::load_artist(&self.db, artist_id).await?.ok_or_else(|| {
            encore_common::Error::NotFound(format!("Artist {} for import job {}", artist_id, job_id))
        })?;

        let mut ctx = PhaseContext {
            artist,
            run: Some(JobRun {
                job,
                lease_owner: owner.to_string(),
            }),
        };

        loop {
            let status = match ctx.run.as_ref() {
                Some(run) => run.job.status,
                None => return Err(ImportError::JobNotFound(job_id)),
            };

            match status {
                JobStatus::Pending | JobStatus::Bootstrapping => {
                    self.enter_phase(&mut ctx, JobStatus::ShowsImporting, "Importing upcoming shows and venues")
                        .await?;
                }
                JobStatus::ShowsImporting => {
                    let phase = ImportPhase::EventsVenues;
                    let result = self.run_timed(phase, ctx.artist.id, self.phase_events(&mut ctx)).await;
                    self.settle_phase(&mut ctx, phase, result).await?;
                    self.enter_phase(&mut ctx, JobStatus::CatalogImporting, "Importing studio catalog")
                        .await?;
                }
                JobStatus::CatalogImporting => {
                    let phase = ImportPhase::StudioCatalog;
                    let result = self.run_timed(phase, ctx.artist.id, self.phase_catalog(&mut ctx)).await;
                    self.settle_phase(&mut ctx, phase, result).await?;
                    self.enter_phase(&mut ctx, JobStatus::WrappingUp, "Wrapping up").await?;
                }
                JobStatus::WrappingUp => {
                    self.phase_wrapup(&mut ctx).await?;
                }
                JobStatus::Completed | JobStatus::PartialFailure | JobStatus::Failed => {
                    return Ok(status);
                }
            }
        }
    }

    /// Apply the bounded phase duration; a timeout fails the phase, keeping its writes
    async fn run_timed<T, F>(&self, phase: ImportPhase, artist_id: Uuid, phase_future: F) -> Result<T, ImportError>
    where
        F: Future<Output = Result<T, ImportError>>,
    {
        let limit = self.settings.max_phase_duration();

        match tokio::time::timeout(limit, phase_future).await {
            Ok(result) => result,
            Err(_) => {
                let items_imported = self.items_in_store(phase, artist_id).await.unwrap_or(0);
                Err(ImportError::PhaseFailed {
                    phase,
                    message: format!("exceeded maximum duration of {}s", limit.as_secs()),
                    items_imported,
                })
            }
        }
    }

    async fn items_in_store(&self, phase: ImportPhase, artist_id: Uuid) -> Result<usize, ImportError> {
        let count = match phase {
            ImportPhase::EventsVenues => shows::count_for_artist(&self.db, artist_id).await?,
            ImportPhase::StudioCatalog => songs::count_for_artist(&self.db, artist_id).await?,
            ImportPhase::Bootstrap | ImportPhase::WrapUp => 0,
        };
        Ok(count)
    }

    /// Record the outcome of a background phase on the job
    ///
    /// Phase failures are kept for wrap-up; fatal errors end the job as
    /// `Failed`; a lost lease stops this runner without further writes.
    async fn settle_phase(
        &self,
        ctx: &mut PhaseContext,
        phase: ImportPhase,
        result: Result<PhaseSummary, ImportError>,
    ) -> Result<(), ImportError> {
        match result {
            Ok(summary) => {
                tracing::info!(
                    artist_id = %ctx.artist.id,
                    phase = %phase,
                    items = summary.items,
                    venues = summary.venues,
                    skipped = summary.skipped,
                    filtered = summary.filtered,
                    "Phase complete"
                );
                self.refresh_counts(ctx).await
            }
            Err(ImportError::LeaseLost(job_id)) => Err(ImportError::LeaseLost(job_id)),
            Err(e) if e.is_fatal() => self.fail_job(ctx, phase, e.to_string()).await,
            Err(e) => {
                let (message, items_imported) = match e {
                    ImportError::PhaseFailed {
                        message,
                        items_imported,
                        ..
                    } => (message, items_imported),
                    other => (other.to_string(), self.items_in_store(phase, ctx.artist.id).await?),
                };

                tracing::warn!(
                    artist_id = %ctx.artist.id,
                    phase = %phase,
                    items_imported,
                    "Phase failed: {}",
                    message
                );

                self.refresh_counts(ctx).await?;
                let Some(run) = ctx.run.as_mut() else {
                    return Ok(());
                };
                run.job.record_phase_error(phase, message.clone(), items_imported);
                jobs::save_job(&self.db, &run.job).await?;
                self.progress
                    .append(
                        run.job.id,
                        phase,
                        run.job.status,
                        run.job.percentage,
                        format!(
                            "{} phase failed after importing {} items: {}",
                            phase, items_imported, message
                        ),
                    )
                    .await?;
                Ok(())
            }
        }
    }

    /// Move a running job into its next phase
    async fn enter_phase(&self, ctx: &mut PhaseContext, status: JobStatus, message: &str) -> Result<(), ImportError> {
        let Some(run) = ctx.run.as_mut() else {
            return Ok(());
        };
        if run.job.is_terminal() {
            return Ok(());
        }

        self.renew_lease(run).await?;

        run.job.transition_to(status);
        run.job.cursor = None;
        run.job.advance_percentage(status.phase().percent_range().0);
        jobs::save_job(&self.db, &run.job).await?;

        self.progress
            .append(run.job.id, status.phase(), status, run.job.percentage, message)
            .await?;

        Ok(())
    }

    /// Report progress within a phase; `fraction` is the share of the phase done
    async fn report(
        &self,
        ctx: &mut PhaseContext,
        phase: ImportPhase,
        fraction: f64,
        message: impl AsRef<str>,
    ) -> Result<(), ImportError> {
        let Some(run) = ctx.run.as_mut() else {
            tracing::debug!(artist_id = %ctx.artist.id, phase = %phase, "{}", message.as_ref());
            return Ok(());
        };

        self.renew_lease(run).await?;

        let (start, end) = phase.percent_range();
        run.job.advance_percentage(start + (end - start) * fraction.clamp(0.0, 1.0));
        jobs::save_job(&self.db, &run.job).await?;

        self.progress
            .append(run.job.id, phase, run.job.status, run.job.percentage, message)
            .await?;

        Ok(())
    }

    /// Persist the restart point after committed work
    async fn checkpoint(&self, ctx: &mut PhaseContext, cursor: PhaseCursor) -> Result<(), ImportError> {
        if let Some(run) = ctx.run.as_mut() {
            run.job.cursor = Some(cursor);
            jobs::save_job(&self.db, &run.job).await?;
        }
        Ok(())
    }

    async fn renew_lease(&self, run: &JobRun) -> Result<(), ImportError> {
        let renewed = jobs::renew_lease(
            &self.db,
            run.job.id,
            &run.lease_owner,
            self.settings.lease_duration(),
        )
        .await?;

        if renewed {
            Ok(())
        } else {
            Err(ImportError::LeaseLost(run.job.id))
        }
    }

    /// Recount the artist's stored rows into the job counts
    async fn refresh_counts(&self, ctx: &mut PhaseContext) -> Result<(), ImportError> {
        let Some(run) = ctx.run.as_mut() else {
            return Ok(());
        };

        let artist_id = ctx.artist.id;
        run.job.counts.shows = shows::count_for_artist(&self.db, artist_id).await?;
        run.job.counts.venues = venues::count_for_artist(&self.db, artist_id).await?;
        run.job.counts.songs = songs::count_for_artist(&self.db, artist_id).await?;
        jobs::save_job(&self.db, &run.job).await?;

        Ok(())
    }

    /// Store a job that just turned terminal, artist outcome first
    ///
    /// Anyone who reads the terminal job also reads the matching artist
    /// status. When the stored job was already terminal the artist is put
    /// back to that job's outcome and the stored status is returned.
    async fn save_terminal_job(&self, job: &ImportJob, artist_id: Uuid) -> Result<Option<JobStatus>, ImportError> {
        if let Some(outcome) = ArtistImportStatus::for_job(job.status) {
            let synced = outcome != ArtistImportStatus::Failed;
            artists::update_import_status(&self.db, artist_id, outcome, synced).await?;
        }

        if jobs::save_job(&self.db, job).await? {
            return Ok(None);
        }

        let stored = jobs::load_job(&self.db, job.id)
            .await?
            .map_or(job.status, |stored| stored.status);
        if let Some(outcome) = ArtistImportStatus::for_job(stored) {
            artists::update_import_status(&self.db, artist_id, outcome, false).await?;
        }
        Ok(Some(stored))
    }

    /// End a job as `Failed` (fatal configuration error)
    async fn fail_job(&self, ctx: &mut PhaseContext, phase: ImportPhase, message: String) -> Result<(), ImportError> {
        tracing::error!(artist_id = %ctx.artist.id, phase = %phase, "Import failed: {}", message);

        let Some(run) = ctx.run.as_mut() else {
            return Ok(());
        };

        run.job.error_detail = Some(message.clone());
        run.job.transition_to(JobStatus::Failed);
        if let Some(stored) = self.save_terminal_job(&run.job, ctx.artist.id).await? {
            tracing::warn!(job_id = %run.job.id, stored_status = %stored, "Job already finalized; failure not recorded");
            return Ok(());
        }

        self.progress
            .append(
                run.job.id,
                phase,
                JobStatus::Failed,
                run.job.percentage,
                format!("Import failed: {}", message),
            )
            .await?;

        Ok(())
    }

    /// Find and store the artist's id in a catalog it was not imported from
    ///
    /// Returns `None` when no listing is close enough to the artist's name or
    /// the id already belongs to another artist.
    async fn resolve_catalog_id(
        &self,
        ctx: &mut PhaseContext,
        source: CatalogSource,
    ) -> Result<Option<String>, ImportError> {
        if let Some(id) = ctx.artist.catalog_id(source) {
            return Ok(Some(id.to_string()));
        }

        let name = ctx.artist.name.clone();
        let candidate = match source {
            CatalogSource::Event => {
                let found = self
                    .executor
                    .call("search_attractions", || self.clients.events.search_by_keyword(&name))
                    .await
                    .map_err(ImportError::from_catalog)?;
                best_name_match(&name, &found, |a| a.name.as_str()).map(|a| a.external_id.clone())
            }
            CatalogSource::Music => {
                let found = self
                    .executor
                    .call("search_artists", || self.clients.music.search_artist(&name))
                    .await
                    .map_err(ImportError::from_catalog)?;
                best_name_match(&name, &found, |a| a.name.as_str()).map(|a| a.external_id.clone())
            }
        };

        let Some(external_id) = candidate else {
            tracing::info!(
                artist_id = %ctx.artist.id,
                catalog = source.as_str(),
                "No matching catalog listing for artist"
            );
            return Ok(None);
        };

        if !artists::set_catalog_id(&self.db, ctx.artist.id, source, &external_id).await? {
            tracing::warn!(
                artist_id = %ctx.artist.id,
                catalog = source.as_str(),
                external_id = %external_id,
                "Catalog id already linked to another artist"
            );
            return Ok(None);
        }

        match source {
            CatalogSource::Event => ctx.artist.event_catalog_id = Some(external_id.clone()),
            CatalogSource::Music => ctx.artist.music_catalog_id = Some(external_id.clone()),
        }

        Ok(Some(external_id))
    }
}

/// Best candidate whose name is at least [`NAME_MATCH_THRESHOLD`] similar
///
/// Comparison is case-insensitive; ties keep the earlier candidate.
pub(crate) fn best_name_match<'a, T>(
    name: &str,
    candidates: &'a [T],
    name_of: impl Fn(&T) -> &str,
) -> Option<&'a T> {
    let wanted = name.trim().to_lowercase();
    let mut best: Option<(f64, &'a T)> = None;

    for candidate in candidates {
        let score = strsim::jaro_winkler(&wanted, &name_of(candidate).trim().to_lowercase());
        if score < NAME_MATCH_THRESHOLD {
            continue;
        }
        if best.map_or(true, |(best_score, _)| score > best_score) {
            best = Some((score, candidate));
        }
    }

    best.map(|(_, candidate)| candidate)
}

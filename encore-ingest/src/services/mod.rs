//! Import pipeline services
//!
//! - [`BatchExecutor`]: bounded-concurrency external calls with retry
//! - [`catalog_dedup`]: studio catalog filter and tie-break rules
//! - [`ProgressStream`]: replayable per-job progress log
//! - [`ImportCoordinator`]: phase state machine, bulk refresh

pub mod batch_executor;
pub mod catalog_dedup;
pub mod import_coordinator;
pub mod import_error;
pub mod progress_stream;

pub use batch_executor::BatchExecutor;
pub use catalog_dedup::{select_studio_tracks, StudioSelection};
pub use import_coordinator::{
    spawn_periodic_sync, spawn_stale_job_sweep, ArtistSyncFailure, BulkSyncReport, CatalogClients, ImportCoordinator,
    StartOutcome, SyncMode,
};
pub use import_error::ImportError;
pub use progress_stream::ProgressStream;

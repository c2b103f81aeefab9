//! Data models for encore-ingest (artist import pipeline)
//!
//! - Catalog entities written by the pipeline (artists, venues, shows, songs)
//! - Import job state owned by the coordinator

pub mod catalog;
pub mod identity;
pub mod import_job;

pub use catalog::{Artist, ArtistImportStatus, Show, Song, Venue, PLACEHOLDER_VENUE_NAME};
pub use identity::{CatalogSource, IdentityKey};
pub use import_job::{ImportCounts, ImportJob, PhaseCursor, PhaseError};

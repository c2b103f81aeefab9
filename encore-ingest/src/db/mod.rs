//! Database access for encore-ingest
//!
//! Free functions over `&SqlitePool`. Tables are created by
//! `encore_common::db::init_database`.

pub mod artists;
pub mod jobs;
pub mod progress_events;
pub mod settings;
pub mod setlists;
pub mod shows;
pub mod songs;
pub mod venues;

use chrono::{DateTime, NaiveDate, Utc};
use encore_common::{Error, Result};
use uuid::Uuid;

pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Invalid UUID in {}: {}", column, e)))
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_date(value: &str, column: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

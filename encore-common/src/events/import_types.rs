//! Import pipeline type definitions
//!
//! Supporting types for encore-ingest job tracking, shared with UI consumers
//! that render import progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Import job lifecycle state
///
/// `Pending → Bootstrapping → ShowsImporting → CatalogImporting → WrappingUp`
/// then one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Bootstrapping,
    ShowsImporting,
    CatalogImporting,
    WrappingUp,
    Completed,
    Failed,
    PartialFailure,
}

impl JobStatus {
    /// Stable string form, used as the database column value
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Bootstrapping => "bootstrapping",
            JobStatus::ShowsImporting => "shows_importing",
            JobStatus::CatalogImporting => "catalog_importing",
            JobStatus::WrappingUp => "wrapping_up",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::PartialFailure => "partial_failure",
        }
    }

    /// Whether the job has finished (no further transitions)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::PartialFailure
        )
    }

    /// Phase that runs while the job is in this state
    pub fn phase(&self) -> ImportPhase {
        match self {
            JobStatus::Pending | JobStatus::Bootstrapping => ImportPhase::Bootstrap,
            JobStatus::ShowsImporting => ImportPhase::EventsVenues,
            JobStatus::CatalogImporting => ImportPhase::StudioCatalog,
            JobStatus::WrappingUp
            | JobStatus::Completed
            | JobStatus::Failed
            | JobStatus::PartialFailure => ImportPhase::WrapUp,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "bootstrapping" => Ok(JobStatus::Bootstrapping),
            "shows_importing" => Ok(JobStatus::ShowsImporting),
            "catalog_importing" => Ok(JobStatus::CatalogImporting),
            "wrapping_up" => Ok(JobStatus::WrappingUp),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "partial_failure" => Ok(JobStatus::PartialFailure),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown job status: {}",
                other
            ))),
        }
    }
}

/// Pipeline phase, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    /// Phase 1: create or locate the local artist record
    Bootstrap,
    /// Phase 2: upcoming shows and their venues
    EventsVenues,
    /// Phase 3: studio song catalog
    StudioCatalog,
    /// Phase 4: placeholder setlists, cache invalidation, finalization
    WrapUp,
}

impl ImportPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportPhase::Bootstrap => "bootstrap",
            ImportPhase::EventsVenues => "events_venues",
            ImportPhase::StudioCatalog => "studio_catalog",
            ImportPhase::WrapUp => "wrap_up",
        }
    }

    /// Percentage window `[start, end)` this phase reports within
    pub fn percent_range(&self) -> (f64, f64) {
        match self {
            ImportPhase::Bootstrap => (0.0, 5.0),
            ImportPhase::EventsVenues => (5.0, 45.0),
            ImportPhase::StudioCatalog => (45.0, 90.0),
            ImportPhase::WrapUp => (90.0, 100.0),
        }
    }
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportPhase {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bootstrap" => Ok(ImportPhase::Bootstrap),
            "events_venues" => Ok(ImportPhase::EventsVenues),
            "studio_catalog" => Ok(ImportPhase::StudioCatalog),
            "wrap_up" => Ok(ImportPhase::WrapUp),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown import phase: {}",
                other
            ))),
        }
    }
}

/// One entry of a job's append-only progress log
///
/// `sequence` starts at 1 and increases strictly per job. `percentage` never
/// decreases within a job. The event carrying a terminal `status` is the last
/// one the job emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub sequence: i64,
    pub phase: ImportPhase,
    pub status: JobStatus,
    pub percentage: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_db_string() {
        for status in [
            JobStatus::Pending,
            JobStatus::Bootstrapping,
            JobStatus::ShowsImporting,
            JobStatus::CatalogImporting,
            JobStatus::WrappingUp,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::PartialFailure,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("finished".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::PartialFailure.is_terminal());
        assert!(!JobStatus::WrappingUp.is_terminal());
        assert!(!JobStatus::Bootstrapping.is_terminal());
    }

    #[test]
    fn test_phase_windows_are_contiguous() {
        let phases = [
            ImportPhase::Bootstrap,
            ImportPhase::EventsVenues,
            ImportPhase::StudioCatalog,
            ImportPhase::WrapUp,
        ];
        for pair in phases.windows(2) {
            assert_eq!(pair[0].percent_range().1, pair[1].percent_range().0);
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(ImportPhase::WrapUp.percent_range().1, 100.0);
    }

    #[test]
    fn test_progress_event_serializes_snake_case() {
        let event = ProgressEvent {
            job_id: Uuid::nil(),
            sequence: 3,
            phase: ImportPhase::EventsVenues,
            status: JobStatus::ShowsImporting,
            percentage: 12.5,
            message: "Imported page 1".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["phase"], "events_venues");
        assert_eq!(json["status"], "shows_importing");
        assert_eq!(json["sequence"], 3);
    }
}

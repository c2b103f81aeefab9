//! Import job state machine
//!
//! `Pending → Bootstrapping → ShowsImporting → CatalogImporting → WrappingUp`
//! then `Completed`, `PartialFailure` or `Failed`.

use chrono::{DateTime, Utc};
use encore_common::events::{ImportPhase, JobStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::IdentityKey;

/// Items written by the background phases
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounts {
    pub shows: usize,
    pub venues: usize,
    pub songs: usize,
}

/// A background phase that failed after exhausting retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseError {
    pub phase: ImportPhase,
    pub message: String,
    /// Items the phase committed before failing
    pub items_imported: usize,
    pub occurred_at: DateTime<Utc>,
}

/// Restart point inside a running phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseCursor {
    /// Next event page to fetch
    EventsVenues { next_page: u32 },
    /// Next album offset to fetch
    StudioCatalog { next_offset: u32 },
}

/// Import job (persisted in `import_jobs`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub identity_key: IdentityKey,
    pub artist_id: Option<Uuid>,
    pub status: JobStatus,
    pub current_phase: ImportPhase,
    /// 0.0 - 100.0, never decreases
    pub percentage: f64,
    pub counts: ImportCounts,
    /// Summary of the most recent failure
    pub error_detail: Option<String>,
    pub phase_errors: Vec<PhaseError>,
    #[serde(skip)]
    pub cursor: Option<PhaseCursor>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    /// New job entering the bootstrap phase
    pub fn new(identity_key: IdentityKey, artist_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity_key,
            artist_id: Some(artist_id),
            status: JobStatus::Bootstrapping,
            current_phase: ImportPhase::Bootstrap,
            percentage: 0.0,
            counts: ImportCounts::default(),
            error_detail: None,
            phase_errors: Vec::new(),
            cursor: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Transition to a new state
    ///
    /// Terminal states are final; transitions out of them are ignored and
    /// return `false`. `Failed` keeps the phase that failed as current phase.
    pub fn transition_to(&mut self, new_status: JobStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        self.status = new_status;
        if new_status != JobStatus::Failed {
            self.current_phase = new_status.phase();
        }
        if new_status.is_terminal() {
            self.completed_at = Some(Utc::now());
            self.cursor = None;
        }
        true
    }

    /// Raise the percentage; lower values are ignored
    pub fn advance_percentage(&mut self, percentage: f64) -> f64 {
        let clamped = percentage.clamp(0.0, 100.0);
        if clamped > self.percentage {
            self.percentage = clamped;
        }
        self.percentage
    }

    /// Record a background phase failure (job continues to wrap-up)
    pub fn record_phase_error(&mut self, phase: ImportPhase, message: String, items_imported: usize) {
        self.error_detail = Some(format!("{} phase failed: {}", phase, message));
        self.phase_errors.push(PhaseError {
            phase,
            message,
            items_imported,
            occurred_at: Utc::now(),
        });
    }

    pub fn has_phase_errors(&self) -> bool {
        !self.phase_errors.is_empty()
    }

    pub fn failed_phases(&self) -> Vec<ImportPhase> {
        self.phase_errors.iter().map(|e| e.phase).collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

//! Import pipeline error taxonomy

use encore_common::events::ImportPhase;
use thiserror::Error;
use uuid::Uuid;

use crate::clients::CatalogError;
use crate::models::CatalogSource;

#[derive(Debug, Error)]
pub enum ImportError {
    /// The identity key does not exist in its catalog; no job is created
    #[error("Artist {external_id} not found in the {} catalog", catalog.as_str())]
    IdentityNotFound {
        catalog: CatalogSource,
        external_id: String,
    },

    /// Rate limit, 5xx or network failure that outlasted the retry policy
    #[error("External service unavailable: {0}")]
    TransientExternal(CatalogError),

    /// A background phase gave up; work it committed is kept
    #[error("{phase} phase failed after importing {items_imported} items: {message}")]
    PhaseFailed {
        phase: ImportPhase,
        message: String,
        items_imported: usize,
    },

    /// Missing or rejected credentials; the job cannot make progress
    #[error("Configuration error: {0}")]
    FatalConfiguration(String),

    #[error("Database error: {0}")]
    Persistence(#[from] encore_common::Error),

    #[error("Import job not found: {0}")]
    JobNotFound(Uuid),

    /// Another runner took over the job's lease
    #[error("Lease on import job {0} lost to another runner")]
    LeaseLost(Uuid),
}

impl ImportError {
    /// Classify a catalog failure that reached the pipeline (retries already spent)
    pub fn from_catalog(err: CatalogError) -> Self {
        if err.is_fatal() {
            ImportError::FatalConfiguration(err.to_string())
        } else {
            ImportError::TransientExternal(err)
        }
    }

    /// Reclassify as a failure of `phase`; fatal and lease errors pass through
    pub fn into_phase_failure(self, phase: ImportPhase, items_imported: usize) -> Self {
        match self {
            ImportError::FatalConfiguration(_)
            | ImportError::LeaseLost(_)
            | ImportError::PhaseFailed { .. } => self,
            other => ImportError::PhaseFailed {
                phase,
                message: other.to_string(),
                items_imported,
            },
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ImportError::FatalConfiguration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_classification() {
        let fatal = ImportError::from_catalog(CatalogError::NotConfigured("music catalog".into()));
        assert!(fatal.is_fatal());

        let transient = ImportError::from_catalog(CatalogError::Network("reset".into()));
        assert!(matches!(transient, ImportError::TransientExternal(_)));
    }

    #[test]
    fn test_phase_failure_names_phase() {
        let err = ImportError::from_catalog(CatalogError::Server {
            service: "event catalog".into(),
            status: 503,
        })
        .into_phase_failure(ImportPhase::EventsVenues, 3);

        let message = err.to_string();
        assert!(message.starts_with("events_venues phase failed after importing 3 items"));
        assert!(message.contains("503"));
    }

    #[test]
    fn test_fatal_passes_through_phase_failure() {
        let err = ImportError::FatalConfiguration("bad key".into())
            .into_phase_failure(ImportPhase::StudioCatalog, 0);
        assert!(err.is_fatal());
    }
}

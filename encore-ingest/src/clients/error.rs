//! External call errors

use std::time::Duration;
use thiserror::Error;

use crate::utils::Retryable;

/// Failure of a call to an external catalog or cache service
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// Connection, timeout, or transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP 429
    #[error("Rate limited by {service}")]
    RateLimited {
        service: String,
        retry_after: Option<Duration>,
    },

    /// HTTP 5xx
    #[error("{service} returned HTTP {status}")]
    Server { service: String, status: u16 },

    #[error("Not found: {0}")]
    NotFound(String),

    /// HTTP 401/403: credentials missing, expired, or revoked
    #[error("{service} rejected credentials (HTTP {status})")]
    Unauthorized { service: String, status: u16 },

    /// No credentials configured for the service
    #[error("{0} credentials not configured")]
    NotConfigured(String),

    /// Malformed or unexpected response body
    #[error("Parse error: {0}")]
    Parse(String),
}

impl CatalogError {
    /// Classify an unsuccessful HTTP status
    pub fn from_status(service: &str, status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => CatalogError::Unauthorized {
                service: service.to_string(),
                status,
            },
            404 => CatalogError::NotFound(format!("{} returned HTTP 404", service)),
            429 => CatalogError::RateLimited {
                service: service.to_string(),
                retry_after,
            },
            500..=599 => CatalogError::Server {
                service: service.to_string(),
                status,
            },
            other => CatalogError::Parse(format!("{} returned unexpected HTTP {}", service, other)),
        }
    }

    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CatalogError::Network(_) | CatalogError::RateLimited { .. } | CatalogError::Server { .. }
        )
    }

    /// Configuration problem: retrying or continuing cannot succeed
    pub fn is_fatal(&self) -> bool {
        matches!(self, CatalogError::Unauthorized { .. } | CatalogError::NotConfigured(_))
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CatalogError::Parse(err.to_string())
        } else {
            CatalogError::Network(err.to_string())
        }
    }
}

impl Retryable for CatalogError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CatalogError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Parse a `Retry-After` header given in seconds
pub(crate) fn retry_after_header(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(CatalogError::from_status("events", 429, None).is_transient());
        assert!(CatalogError::from_status("events", 503, None).is_transient());
        assert!(CatalogError::from_status("events", 401, None).is_fatal());
        assert!(CatalogError::from_status("events", 403, None).is_fatal());

        let not_found = CatalogError::from_status("events", 404, None);
        assert!(!not_found.is_transient());
        assert!(!not_found.is_fatal());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = CatalogError::from_status("music", 429, Some(Duration::from_secs(3)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert!(CatalogError::NotConfigured("music catalog".into()).is_fatal());
    }
}

//! External collaborators
//!
//! Each external service sits behind an async trait so the pipeline can run
//! against the HTTP implementations in production and in-memory fakes in
//! tests.

pub mod cache_invalidator;
pub mod error;
pub mod event_catalog;
pub mod music_catalog;

pub use cache_invalidator::{
    artist_cache_tags, CacheInvalidator, HttpCacheInvalidator, NoopCacheInvalidator,
};
pub use error::CatalogError;
pub use event_catalog::{
    AttractionSummary, CatalogEvent, DateRange, EventCatalog, EventPage, EventVenue,
    HttpEventCatalog,
};
pub use music_catalog::{
    Album, AlbumPage, ArtistSummary, ClientCredentials, HttpMusicCatalog, MusicCatalog, Track,
};

use std::time::Duration;

/// Per-request timeout for catalog HTTP calls
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn user_agent() -> String {
    format!("encore-ingest/{}", env!("CARGO_PKG_VERSION"))
}

/// Build a reqwest client with the shared timeouts
pub(crate) fn http_client() -> Result<reqwest::Client, CatalogError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(user_agent())
        .build()
        .map_err(|e| CatalogError::Network(format!("Failed to build HTTP client: {}", e)))
}

//! Cache tag invalidation
//!
//! Pages that show an artist are cached under tags. After an import the
//! artist's tags are invalidated so readers see the new shows and songs.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use uuid::Uuid;

use super::error::{retry_after_header, CatalogError};

const SERVICE: &str = "cache invalidation";

/// Tags covering every cached view of an artist
pub fn artist_cache_tags(artist_id: Uuid, slug: &str) -> Vec<String> {
    vec![
        format!("artist:{}", artist_id),
        format!("artist:{}", slug),
        format!("artist-shows:{}", artist_id),
        format!("artist-songs:{}", artist_id),
    ]
}

#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate_tags(&self, tags: &[String]) -> Result<(), CatalogError>;
}

/// Posts `{"tags": [...]}` to a revalidation webhook
pub struct HttpCacheInvalidator {
    client: Client,
    url: String,
}

impl HttpCacheInvalidator {
    pub fn new(url: String) -> Result<Self, CatalogError> {
        Ok(Self {
            client: super::http_client()?,
            url,
        })
    }
}

#[async_trait]
impl CacheInvalidator for HttpCacheInvalidator {
    async fn invalidate_tags(&self, tags: &[String]) -> Result<(), CatalogError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "tags": tags }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::from_status(
                SERVICE,
                status.as_u16(),
                retry_after_header(&response),
            ));
        }

        tracing::debug!(count = tags.len(), "Cache tags invalidated");
        Ok(())
    }
}

/// Used when no invalidation endpoint is configured
#[derive(Debug, Default)]
pub struct NoopCacheInvalidator;

#[async_trait]
impl CacheInvalidator for NoopCacheInvalidator {
    async fn invalidate_tags(&self, tags: &[String]) -> Result<(), CatalogError> {
        tracing::debug!(?tags, "No cache invalidation endpoint configured, skipping");
        Ok(())
    }
}

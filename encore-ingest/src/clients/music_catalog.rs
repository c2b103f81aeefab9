//! Music catalog (streaming service): artists, albums, tracks, audio features
//!
//! The HTTP implementation targets a Web-API-style service using the OAuth
//! client-credentials flow. Access tokens are cached until shortly before
//! they expire.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::NaiveDate;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::error::{retry_after_header, CatalogError};

const SERVICE: &str = "music catalog";
const DEFAULT_API_URL: &str = "https://api.spotify.com/v1";
const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
/// Albums per page
const ALBUM_PAGE_SIZE: u32 = 20;
/// Tracks per page of a release listing
const TRACK_PAGE_SIZE: u32 = 50;
/// Maximum ids per batch lookup (tracks, audio features)
const ID_BATCH_SIZE: usize = 50;
const REQUESTS_PER_SECOND: u32 = 10;
/// Refresh tokens this long before the advertised expiry
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct ArtistSummary {
    pub external_id: String,
    pub name: String,
    pub genres: Vec<String>,
    pub popularity: Option<i64>,
    pub image_url: Option<String>,
}

/// A release (album, single, EP)
#[derive(Debug, Clone, PartialEq)]
pub struct Album {
    pub external_id: String,
    pub name: String,
    pub release_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlbumPage {
    pub albums: Vec<Album>,
    /// Offset of the following page; `None` on the last page
    pub next_offset: Option<u32>,
    /// Total releases across all pages
    pub total: u32,
}

/// Track with the detail needed for filtering and deduplication
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub external_id: String,
    /// ISRC; `None` when the catalog has no recording code for the track
    pub recording_id: Option<String>,
    pub title: String,
    pub album_name: Option<String>,
    /// 0-100
    pub popularity: i64,
    /// 0.0-1.0 probability the track is a live recording; `None` if unknown
    pub liveness: Option<f64>,
    pub release_date: Option<NaiveDate>,
    pub duration_ms: Option<i64>,
}

#[async_trait]
pub trait MusicCatalog: Send + Sync {
    /// Look up a single artist; `Ok(None)` when the id is unknown
    async fn get_artist(&self, external_id: &str) -> Result<Option<ArtistSummary>, CatalogError>;

    async fn search_artist(&self, name: &str) -> Result<Vec<ArtistSummary>, CatalogError>;

    /// One page of the artist's releases starting at `offset`
    async fn list_albums_page(&self, artist_id: &str, offset: u32) -> Result<AlbumPage, CatalogError>;

    /// Every track on a release, with popularity, liveness and recording id
    async fn list_tracks(&self, album_id: &str) -> Result<Vec<Track>, CatalogError>;
}

/// Parse `YYYY`, `YYYY-MM` or `YYYY-MM-DD`; partial dates map to the first day
pub fn parse_release_date(value: &str) -> Option<NaiveDate> {
    let mut parts = value.trim().splitn(3, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next().map(str::parse).transpose().ok()?.unwrap_or(1);
    let day: u32 = parts.next().map(str::parse).transpose().ok()?.unwrap_or(1);
    NaiveDate::from_ymd_opt(year, month, day)
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct ApiArtist {
    id: String,
    name: String,
    #[serde(default)]
    genres: Vec<String>,
    popularity: Option<i64>,
    #[serde(default)]
    images: Vec<ApiImage>,
}

#[derive(Debug, Deserialize)]
struct ApiImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ApiArtistSearch {
    artists: ApiPaging<ApiArtist>,
}

#[derive(Debug, Deserialize)]
struct ApiPaging<T> {
    items: Vec<T>,
    next: Option<String>,
    #[serde(default)]
    offset: u32,
    #[serde(default)]
    total: u32,
}

impl<T> ApiPaging<T> {
    /// Offset of the following page, if the service advertises one
    fn next_offset(&self) -> Option<u32> {
        match (&self.next, self.items.len()) {
            (Some(_), count) if count > 0 => Some(self.offset + count as u32),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiAlbum {
    id: String,
    name: String,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiTrackRef {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiTracks {
    tracks: Vec<Option<ApiTrack>>,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    id: String,
    name: String,
    #[serde(default)]
    popularity: i64,
    duration_ms: Option<i64>,
    external_ids: Option<ApiExternalIds>,
    album: Option<ApiAlbum>,
}

#[derive(Debug, Deserialize)]
struct ApiExternalIds {
    isrc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiAudioFeatures {
    audio_features: Vec<Option<ApiFeature>>,
}

#[derive(Debug, Deserialize)]
struct ApiFeature {
    id: String,
    liveness: Option<f64>,
}

impl From<ApiArtist> for ArtistSummary {
    fn from(api: ApiArtist) -> Self {
        Self {
            external_id: api.id,
            name: api.name,
            genres: api.genres,
            popularity: api.popularity,
            // Images are listed widest first
            image_url: api.images.into_iter().next().map(|i| i.url),
        }
    }
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Credentials for the client-credentials token flow
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Music catalog over HTTP
pub struct HttpMusicCatalog {
    client: Client,
    api_url: String,
    token_url: String,
    credentials: Option<ClientCredentials>,
    token: Mutex<Option<CachedToken>>,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpMusicCatalog {
    /// Client for the public API; without credentials every call fails with `NotConfigured`
    pub fn new(credentials: Option<ClientCredentials>) -> Result<Self, CatalogError> {
        Self::with_urls(credentials, DEFAULT_API_URL, DEFAULT_TOKEN_URL)
    }

    pub fn with_urls(
        credentials: Option<ClientCredentials>,
        api_url: &str,
        token_url: &str,
    ) -> Result<Self, CatalogError> {
        let quota = Quota::per_second(NonZeroU32::new(REQUESTS_PER_SECOND).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client: super::http_client()?,
            api_url: api_url.trim_end_matches('/').to_string(),
            token_url: token_url.to_string(),
            credentials: credentials
                .filter(|c| !c.client_id.trim().is_empty() && !c.client_secret.trim().is_empty()),
            token: Mutex::new(None),
            rate_limiter: RateLimiter::direct(quota),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    /// Cached access token, fetching a new one when missing or near expiry
    async fn access_token(&self) -> Result<String, CatalogError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| CatalogError::NotConfigured(SERVICE.to_string()))?;

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let basic = BASE64.encode(format!("{}:{}", credentials.client_id, credentials.client_secret));
        let response = self
            .client
            .post(&self.token_url)
            .header(reqwest::header::AUTHORIZATION, format!("Basic {}", basic))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // A rejected token request is a credentials problem regardless of code
            if status == StatusCode::BAD_REQUEST {
                return Err(CatalogError::Unauthorized {
                    service: SERVICE.to_string(),
                    status: status.as_u16(),
                });
            }
            return Err(CatalogError::from_status(
                SERVICE,
                status.as_u16(),
                retry_after_header(&response),
            ));
        }

        let token: ApiToken = response
            .json()
            .await
            .map_err(|e| CatalogError::Parse(format!("Failed to parse token response: {}", e)))?;

        tracing::debug!(expires_in = token.expires_in, "Obtained music catalog access token");

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(token.access_token)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, CatalogError> {
        let url = format!("{}/{}", self.api_url, path);

        // One refresh on 401: the cached token may have been revoked early
        for attempt in 0..2 {
            let token = self.access_token().await?;
            self.rate_limiter.until_ready().await;

            tracing::debug!(url = %url, "Querying music catalog");
            let response = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .query(query)
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && attempt == 0 {
                *self.token.lock().await = None;
                continue;
            }
            if !status.is_success() {
                return Err(CatalogError::from_status(
                    SERVICE,
                    status.as_u16(),
                    retry_after_header(&response),
                ));
            }

            return response.json::<T>().await.map_err(|e| {
                CatalogError::Parse(format!("Failed to parse music catalog response: {}", e))
            });
        }

        Err(CatalogError::Unauthorized {
            service: SERVICE.to_string(),
            status: StatusCode::UNAUTHORIZED.as_u16(),
        })
    }
}

#[async_trait]
impl MusicCatalog for HttpMusicCatalog {
    async fn get_artist(&self, external_id: &str) -> Result<Option<ArtistSummary>, CatalogError> {
        match self.get_json::<ApiArtist>(&format!("artists/{}", external_id), &[]).await {
            Ok(artist) => Ok(Some(artist.into())),
            // Malformed ids come back as 400
            Err(CatalogError::NotFound(_)) => Ok(None),
            Err(CatalogError::Parse(msg)) if msg.contains("HTTP 400") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn search_artist(&self, name: &str) -> Result<Vec<ArtistSummary>, CatalogError> {
        let search: ApiArtistSearch = self
            .get_json(
                "search",
                &[
                    ("q", name.to_string()),
                    ("type", "artist".to_string()),
                    ("limit", "10".to_string()),
                ],
            )
            .await?;

        Ok(search.artists.items.into_iter().map(ArtistSummary::from).collect())
    }

    async fn list_albums_page(&self, artist_id: &str, offset: u32) -> Result<AlbumPage, CatalogError> {
        let page: ApiPaging<ApiAlbum> = self
            .get_json(
                &format!("artists/{}/albums", artist_id),
                &[
                    ("include_groups", "album,single".to_string()),
                    ("limit", ALBUM_PAGE_SIZE.to_string()),
                    ("offset", offset.to_string()),
                ],
            )
            .await?;

        let next_offset = page.next_offset();

        Ok(AlbumPage {
            albums: page
                .items
                .into_iter()
                .map(|a| Album {
                    release_date: a.release_date.as_deref().and_then(parse_release_date),
                    external_id: a.id,
                    name: a.name,
                })
                .collect(),
            next_offset,
            total: page.total,
        })
    }

    async fn list_tracks(&self, album_id: &str) -> Result<Vec<Track>, CatalogError> {
        let mut ids: Vec<String> = Vec::new();
        let mut offset = Some(0);

        while let Some(current) = offset {
            let listing: ApiPaging<ApiTrackRef> = self
                .get_json(
                    &format!("albums/{}/tracks", album_id),
                    &[
                        ("limit", TRACK_PAGE_SIZE.to_string()),
                        ("offset", current.to_string()),
                    ],
                )
                .await?;

            offset = listing.next_offset().filter(|next| *next > current);
            ids.extend(listing.items.into_iter().filter_map(|t| t.id));
        }
        let mut tracks = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(ID_BATCH_SIZE) {
            let joined = chunk.join(",");

            let detail: ApiTracks = self.get_json("tracks", &[("ids", joined.clone())]).await?;
            let features: ApiAudioFeatures =
                self.get_json("audio-features", &[("ids", joined)]).await?;

            let liveness: HashMap<String, f64> = features
                .audio_features
                .into_iter()
                .flatten()
                .filter_map(|f| f.liveness.map(|l| (f.id, l)))
                .collect();

            tracks.extend(detail.tracks.into_iter().flatten().map(|t| {
                let album = t.album;
                Track {
                    liveness: liveness.get(&t.id).copied(),
                    recording_id: t
                        .external_ids
                        .and_then(|e| e.isrc)
                        .map(|isrc| isrc.trim().to_ascii_uppercase())
                        .filter(|isrc| !isrc.is_empty()),
                    title: t.name,
                    album_name: album.as_ref().map(|a| a.name.clone()),
                    popularity: t.popularity,
                    release_date: album
                        .and_then(|a| a.release_date)
                        .as_deref()
                        .and_then(parse_release_date),
                    duration_ms: t.duration_ms,
                    external_id: t.id,
                }
            }));
        }

        Ok(tracks)
    }
}

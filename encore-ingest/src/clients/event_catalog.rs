//! Event catalog (ticketing service): attractions, upcoming events, venues
//!
//! The HTTP implementation targets a Discovery-style REST API authenticated
//! with an API key query parameter.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;

use super::error::{retry_after_header, CatalogError};

const SERVICE: &str = "event catalog";
const DEFAULT_BASE_URL: &str = "https://app.ticketmaster.com/discovery/v2";
/// Events per page requested from the API
const PAGE_SIZE: u32 = 50;
/// Documented limit is 5 requests per second per key
const REQUESTS_PER_SECOND: u32 = 5;

/// Performer as listed by the event catalog
#[derive(Debug, Clone, PartialEq)]
pub struct AttractionSummary {
    pub external_id: String,
    pub name: String,
    pub image_url: Option<String>,
    pub genres: Vec<String>,
}

/// Inclusive date window for event listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Today through today + `days`
    pub fn upcoming(days: i64) -> Self {
        let start = Utc::now().date_naive();
        Self {
            start,
            end: start + ChronoDuration::days(days.max(0)),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Venue as embedded in an event; every field may be missing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventVenue {
    pub external_id: Option<String>,
    pub name: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
}

/// One scheduled performance
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEvent {
    pub external_id: String,
    pub name: String,
    /// Local start date; `None` for events the catalog lists as TBA
    pub date: Option<NaiveDate>,
    pub venue: Option<EventVenue>,
    pub ticket_url: Option<String>,
}

/// One page of an event listing
#[derive(Debug, Clone, PartialEq)]
pub struct EventPage {
    pub events: Vec<CatalogEvent>,
    /// Zero-based page number
    pub page: u32,
    pub total_pages: u32,
}

impl EventPage {
    pub fn next_page(&self) -> Option<u32> {
        (self.page + 1 < self.total_pages).then_some(self.page + 1)
    }
}

#[async_trait]
pub trait EventCatalog: Send + Sync {
    /// Look up a single attraction; `Ok(None)` when the id is unknown
    async fn get_attraction(&self, external_id: &str) -> Result<Option<AttractionSummary>, CatalogError>;

    async fn search_by_keyword(&self, keyword: &str) -> Result<Vec<AttractionSummary>, CatalogError>;

    /// One page (zero-based) of the attraction's events within `range`
    async fn list_events_page(
        &self,
        attraction_id: &str,
        range: DateRange,
        page: u32,
    ) -> Result<EventPage, CatalogError>;
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiAttraction {
    id: String,
    name: String,
    #[serde(default)]
    images: Vec<ApiImage>,
    #[serde(default)]
    classifications: Vec<ApiClassification>,
}

#[derive(Debug, Deserialize)]
struct ApiImage {
    url: String,
    #[serde(default)]
    width: u32,
}

#[derive(Debug, Deserialize)]
struct ApiClassification {
    genre: Option<ApiNamed>,
}

#[derive(Debug, Deserialize)]
struct ApiNamed {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiAttractionSearch {
    #[serde(rename = "_embedded")]
    embedded: Option<ApiAttractionList>,
}

#[derive(Debug, Deserialize)]
struct ApiAttractionList {
    #[serde(default)]
    attractions: Vec<ApiAttraction>,
}

#[derive(Debug, Deserialize)]
struct ApiEventSearch {
    #[serde(rename = "_embedded")]
    embedded: Option<ApiEventList>,
    page: Option<ApiPage>,
}

#[derive(Debug, Deserialize)]
struct ApiEventList {
    #[serde(default)]
    events: Vec<ApiEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPage {
    number: u32,
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct ApiEvent {
    id: String,
    name: String,
    url: Option<String>,
    dates: Option<ApiDates>,
    #[serde(rename = "_embedded")]
    embedded: Option<ApiEventEmbedded>,
}

#[derive(Debug, Deserialize)]
struct ApiDates {
    start: Option<ApiStart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiStart {
    local_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiEventEmbedded {
    #[serde(default)]
    venues: Vec<ApiVenue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiVenue {
    id: Option<String>,
    name: Option<String>,
    city: Option<ApiNamed>,
    state: Option<ApiState>,
    country: Option<ApiCountry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiState {
    state_code: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCountry {
    country_code: Option<String>,
}

impl From<ApiAttraction> for AttractionSummary {
    fn from(api: ApiAttraction) -> Self {
        // Widest image is the best for artist headers
        let image_url = api
            .images
            .into_iter()
            .max_by_key(|img| img.width)
            .map(|img| img.url);
        let mut genres: Vec<String> = api
            .classifications
            .into_iter()
            .filter_map(|c| c.genre.map(|g| g.name))
            .filter(|g| !g.eq_ignore_ascii_case("undefined"))
            .collect();
        genres.dedup();

        Self {
            external_id: api.id,
            name: api.name,
            image_url,
            genres,
        }
    }
}

impl From<ApiEvent> for CatalogEvent {
    fn from(api: ApiEvent) -> Self {
        let date = api
            .dates
            .and_then(|d| d.start)
            .and_then(|s| s.local_date)
            .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok());
        let venue = api
            .embedded
            .and_then(|e| e.venues.into_iter().next())
            .map(|v| EventVenue {
                external_id: v.id,
                name: v.name,
                city: v.city.map(|c| c.name),
                region: v.state.and_then(|s| s.state_code.or(s.name)),
                country: v.country.and_then(|c| c.country_code),
            });

        Self {
            external_id: api.id,
            name: api.name,
            date,
            venue,
            ticket_url: api.url,
        }
    }
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Event catalog over HTTP
pub struct HttpEventCatalog {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpEventCatalog {
    /// Client for the public API; without a key every call fails with `NotConfigured`
    pub fn new(api_key: Option<String>) -> Result<Self, CatalogError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: Option<String>, base_url: &str) -> Result<Self, CatalogError> {
        let quota = Quota::per_second(NonZeroU32::new(REQUESTS_PER_SECOND).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client: super::http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            rate_limiter: RateLimiter::direct(quota),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, CatalogError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CatalogError::NotConfigured(SERVICE.to_string()))?;

        self.rate_limiter.until_ready().await;

        let url = format!("{}/{}", self.base_url, path);
        tracing::debug!(url = %url, "Querying event catalog");

        let response = self
            .client
            .get(&url)
            .query(&[("apikey", api_key)])
            .query(query)
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

        response
            .json::<T>()
            .await
            .map_err(|e| CatalogError::Parse(format!("Failed to parse event catalog response: {}", e)))
    }
}

#[async_trait]
impl EventCatalog for HttpEventCatalog {
    async fn get_attraction(&self, external_id: &str) -> Result<Option<AttractionSummary>, CatalogError> {
        match self
            .get_json::<ApiAttraction>(&format!("attractions/{}.json", external_id), &[])
            .await
        {
            Ok(attraction) => Ok(Some(attraction.into())),
            Err(CatalogError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn search_by_keyword(&self, keyword: &str) -> Result<Vec<AttractionSummary>, CatalogError> {
        let search: ApiAttractionSearch = self
            .get_json(
                "attractions.json",
                &[
                    ("keyword", keyword.to_string()),
                    ("classificationName", "music".to_string()),
                ],
            )
            .await?;

        Ok(search
            .embedded
            .map(|e| e.attractions.into_iter().map(AttractionSummary::from).collect())
            .unwrap_or_default())
    }

    async fn list_events_page(
        &self,
        attraction_id: &str,
        range: DateRange,
        page: u32,
    ) -> Result<EventPage, CatalogError> {
        let search: ApiEventSearch = self
            .get_json(
                "events.json",
                &[
                    ("attractionId", attraction_id.to_string()),
                    ("startDateTime", format!("{}T00:00:00Z", range.start)),
                    ("endDateTime", format!("{}T23:59:59Z", range.end)),
                    ("sort", "date,asc".to_string()),
                    ("size", PAGE_SIZE.to_string()),
                    ("page", page.to_string()),
                ],
            )
            .await?;

        let (number, total_pages) = search
            .page
            .map(|p| (p.number, p.total_pages))
            .unwrap_or((page, 0));

        Ok(EventPage {
            events: search
                .embedded
                .map(|e| e.events.into_iter().map(CatalogEvent::from).collect())
                .unwrap_or_default(),
            page: number,
            total_pages,
        })
    }
}

//! In-memory catalogs with scripted failures

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use encore_ingest::clients::{
    Album, AlbumPage, ArtistSummary, AttractionSummary, CacheInvalidator, CatalogError,
    CatalogEvent, DateRange, EventCatalog, EventPage, EventVenue, MusicCatalog, Track,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn attraction(id: &str, name: &str) -> AttractionSummary {
    AttractionSummary {
        external_id: id.to_string(),
        name: name.to_string(),
        image_url: None,
        genres: vec!["Rock".to_string()],
    }
}

pub fn music_artist(id: &str, name: &str) -> ArtistSummary {
    ArtistSummary {
        external_id: id.to_string(),
        name: name.to_string(),
        genres: vec!["jam band".to_string()],
        popularity: Some(61),
        image_url: None,
    }
}

/// Event `days_ahead` days from today; `venue_name: None` leaves the venue out
pub fn event(id: &str, days_ahead: i64, venue_name: Option<&str>) -> CatalogEvent {
    CatalogEvent {
        external_id: id.to_string(),
        name: format!("Show {}", id),
        date: Some(Utc::now().date_naive() + ChronoDuration::days(days_ahead)),
        venue: venue_name.map(|name| EventVenue {
            external_id: Some(format!("V-{}", name)),
            name: Some(name.to_string()),
            city: Some("Denver".to_string()),
            region: Some("CO".to_string()),
            country: Some("US".to_string()),
        }),
        ticket_url: Some(format!("https://tickets.example/{}", id)),
    }
}

pub fn album(id: &str, year: i32) -> Album {
    Album {
        external_id: id.to_string(),
        name: format!("Album {}", id),
        release_date: NaiveDate::from_ymd_opt(year, 1, 1),
    }
}

pub fn track(id: &str, recording_id: &str, popularity: i64, liveness: f64) -> Track {
    Track {
        external_id: id.to_string(),
        recording_id: Some(recording_id.to_string()),
        title: format!("Song {}", recording_id),
        album_name: None,
        popularity,
        liveness: Some(liveness),
        release_date: None,
        duration_ms: Some(300_000),
    }
}

/// Event catalog serving one fixed lineup for every attraction
///
/// Event ids are served as `<attraction>-<id>` so two artists never share a show.
pub struct FakeEventCatalog {
    attractions: Vec<AttractionSummary>,
    events: Mutex<Vec<CatalogEvent>>,
    page_size: usize,
    failure: Mutex<Option<CatalogError>>,
    calls: AtomicUsize,
}

impl FakeEventCatalog {
    pub fn new(attractions: Vec<AttractionSummary>, events: Vec<CatalogEvent>) -> Self {
        Self {
            attractions,
            events: Mutex::new(events),
            page_size: 1,
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Every call fails with `err`
    pub fn failing(err: CatalogError) -> Self {
        let catalog = Self::empty();
        catalog.fail_with(Some(err));
        catalog
    }

    pub fn fail_with(&self, err: Option<CatalogError>) {
        *self.failure.lock().unwrap() = err;
    }

    pub fn push_event(&self, event: CatalogEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EventCatalog for FakeEventCatalog {
    async fn get_attraction(&self, external_id: &str) -> Result<Option<AttractionSummary>, CatalogError> {
        self.check()?;
        Ok(self
            .attractions
            .iter()
            .find(|a| a.external_id == external_id)
            .cloned())
    }

    async fn search_by_keyword(&self, keyword: &str) -> Result<Vec<AttractionSummary>, CatalogError> {
        self.check()?;
        let keyword = keyword.to_lowercase();
        Ok(self
            .attractions
            .iter()
            .filter(|a| a.name.to_lowercase().contains(&keyword))
            .cloned()
            .collect())
    }

    async fn list_events_page(
        &self,
        attraction_id: &str,
        range: DateRange,
        page: u32,
    ) -> Result<EventPage, CatalogError> {
        self.check()?;
        let events: Vec<CatalogEvent> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.date.map_or(true, |d| range.contains(d)))
            .map(|e| CatalogEvent {
                external_id: format!("{}-{}", attraction_id, e.external_id),
                ..e.clone()
            })
            .collect();

        let total_pages = events.len().div_ceil(self.page_size) as u32;
        let start = page as usize * self.page_size;
        let page_events = events.into_iter().skip(start).take(self.page_size).collect();

        Ok(EventPage {
            events: page_events,
            page,
            total_pages,
        })
    }
}

/// Music catalog with releases paged two at a time
pub struct FakeMusicCatalog {
    artists: Vec<ArtistSummary>,
    albums: Vec<Album>,
    tracks: HashMap<String, Vec<Track>>,
    page_size: usize,
    failure: Mutex<Option<CatalogError>>,
    /// Albums whose track listing fails with the given error
    album_failures: Mutex<HashMap<String, CatalogError>>,
    calls: AtomicUsize,
}

impl FakeMusicCatalog {
    pub fn new(artists: Vec<ArtistSummary>, albums: Vec<(Album, Vec<Track>)>) -> Self {
        let mut tracks = HashMap::new();
        let albums = albums
            .into_iter()
            .map(|(album, album_tracks)| {
                tracks.insert(album.external_id.clone(), album_tracks);
                album
            })
            .collect();

        Self {
            artists,
            albums,
            tracks,
            page_size: 2,
            failure: Mutex::new(None),
            album_failures: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn fail_with(&self, err: Option<CatalogError>) {
        *self.failure.lock().unwrap() = err;
    }

    pub fn fail_album(&self, album_id: &str, err: CatalogError) {
        self.album_failures
            .lock()
            .unwrap()
            .insert(album_id.to_string(), err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MusicCatalog for FakeMusicCatalog {
    async fn get_artist(&self, external_id: &str) -> Result<Option<ArtistSummary>, CatalogError> {
        self.check()?;
        Ok(self
            .artists
            .iter()
            .find(|a| a.external_id == external_id)
            .cloned())
    }

    async fn search_artist(&self, name: &str) -> Result<Vec<ArtistSummary>, CatalogError> {
        self.check()?;
        let name = name.to_lowercase();
        Ok(self
            .artists
            .iter()
            .filter(|a| a.name.to_lowercase().contains(&name))
            .cloned()
            .collect())
    }

    async fn list_albums_page(&self, _artist_id: &str, offset: u32) -> Result<AlbumPage, CatalogError> {
        self.check()?;
        let start = offset as usize;
        let albums: Vec<Album> = self
            .albums
            .iter()
            .skip(start)
            .take(self.page_size)
            .cloned()
            .collect();
        let end = start + albums.len();
        let next_offset = (end < self.albums.len()).then_some(end as u32);

        Ok(AlbumPage {
            albums,
            next_offset,
            total: self.albums.len() as u32,
        })
    }

    async fn list_tracks(&self, album_id: &str) -> Result<Vec<Track>, CatalogError> {
        self.check()?;
        if let Some(err) = self.album_failures.lock().unwrap().get(album_id) {
            return Err(err.clone());
        }
        Ok(self.tracks.get(album_id).cloned().unwrap_or_default())
    }
}

/// Records every invalidation request
#[derive(Default)]
pub struct RecordingCacheInvalidator {
    requests: Mutex<Vec<Vec<String>>>,
}

impl RecordingCacheInvalidator {
    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CacheInvalidator for RecordingCacheInvalidator {
    async fn invalidate_tags(&self, tags: &[String]) -> Result<(), CatalogError> {
        self.requests.lock().unwrap().push(tags.to_vec());
        Ok(())
    }
}

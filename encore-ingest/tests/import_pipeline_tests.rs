//! End-to-end import pipeline tests against in-memory catalogs

mod helpers;

use encore_common::events::{ImportPhase, JobStatus};
use encore_ingest::clients::CatalogError;
use encore_ingest::db::{artists, setlists, shows, songs, venues};
use encore_ingest::models::{ArtistImportStatus, IdentityKey, ImportJob, PLACEHOLDER_VENUE_NAME};
use encore_ingest::services::ImportError;
use futures::StreamExt;
use helpers::*;
use std::time::Duration;
use tracing::Level;

/// Five releases, twelve distinct studio recordings
fn studio_catalog() -> FakeMusicCatalog {
    let mut releases = Vec::new();
    let mut n = 0;
    for (index, size) in [3, 3, 2, 2, 2].into_iter().enumerate() {
        let release = album(&format!("A{}", index), 1990 + index as i32);
        let tracks = (0..size)
            .map(|_| {
                n += 1;
                track(&format!("T{}", n), &format!("REC{:02}", n), 30 + n, 0.1)
            })
            .collect();
        releases.push((release, tracks));
    }
    FakeMusicCatalog::new(vec![music_artist("M1", "Phish")], releases)
}

fn two_shows() -> FakeEventCatalog {
    FakeEventCatalog::new(
        vec![attraction("K1", "Phish")],
        vec![
            event("E1", 10, Some("Red Rocks Amphitheatre")),
            event("E2", 40, Some("Madison Square Garden")),
        ],
    )
}

async fn import_to_end(harness: &TestHarness, key: &str) -> ImportJob {
    let outcome = harness
        .coordinator
        .start(key.parse::<IdentityKey>().unwrap())
        .await
        .unwrap();
    wait_for_terminal(&harness.coordinator, outcome.job_id).await
}

#[tokio::test]
async fn test_new_artist_import_completes() {
    let harness = TestHarness::new(two_shows(), studio_catalog()).await;

    let outcome = harness
        .coordinator
        .start(IdentityKey::event("K1").unwrap())
        .await
        .unwrap();
    assert!(outcome.is_new_artist);
    assert!(!outcome.already_running);
    assert_eq!(outcome.slug, "phish");

    let job = wait_for_terminal(&harness.coordinator, outcome.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.percentage, 100.0);
    assert_eq!(job.counts.shows, 2);
    assert!(job.counts.venues <= 2);
    assert_eq!(job.counts.songs, 12);
    assert!(job.phase_errors.is_empty());

    // Cross-catalog id resolved by name
    let artist = artists::load_artist(&harness.db, outcome.artist_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(artist.music_catalog_id.as_deref(), Some("M1"));
    assert_eq!(artist.import_status, ArtistImportStatus::Complete);
    assert!(artist.last_synced_at.is_some());

    // Wrap-up seeded setlists and invalidated the artist's tags
    assert_eq!(setlists::count_for_artist(&harness.db, artist.id).await.unwrap(), 2);
    let requests = harness.cache.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].contains(&format!("artist:{}", artist.id)));
    assert!(requests[0].contains(&"artist:phish".to_string()));
}

#[tokio::test]
async fn test_repeated_start_returns_same_artist() {
    let harness = TestHarness::new(two_shows(), studio_catalog()).await;

    let first = import_to_end(&harness, "event:K1").await;
    let second = import_to_end(&harness, "event:K1").await;

    assert_ne!(first.id, second.id);
    assert_eq!(first.artist_id, second.artist_id);
    assert_eq!(artists::count_artists(&harness.db).await.unwrap(), 1);

    // Re-import upserts; nothing is duplicated
    assert_eq!(second.counts.shows, 2);
    assert_eq!(second.counts.songs, 12);
}

#[tokio::test]
async fn test_concurrent_starts_share_artist_and_job() {
    let harness = TestHarness::new(two_shows(), studio_catalog()).await;
    let key = IdentityKey::event("K1").unwrap();

    let (a, b) = tokio::join!(
        harness.coordinator.start(key.clone()),
        harness.coordinator.start(key.clone())
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.artist_id, b.artist_id);
    assert_eq!(a.job_id, b.job_id);
    assert!(a.already_running || b.already_running);
    assert_eq!(artists::count_artists(&harness.db).await.unwrap(), 1);

    let job = wait_for_terminal(&harness.coordinator, a.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(count_rows(&harness.db, "import_jobs").await, 1);
}

#[tokio::test]
async fn test_live_tracks_filtered_and_recordings_deduplicated() {
    // 50 tracks over 5 releases, 10 recording ids, first 5 tracks live
    let releases = (0..5)
        .map(|r| {
            let tracks = (0..10)
                .map(|t| {
                    let i = r * 10 + t;
                    let liveness = if i < 5 { 0.95 } else { 0.2 };
                    track(&format!("T{}", i), &format!("REC{}", i % 10), i as i64, liveness)
                })
                .collect();
            (album(&format!("A{}", r), 2000 + r as i32), tracks)
        })
        .collect();
    let music = FakeMusicCatalog::new(vec![music_artist("M1", "Phish")], releases);
    let harness = TestHarness::new(two_shows(), music).await;

    let job = import_to_end(&harness, "music:M1").await;
    assert_eq!(job.status, JobStatus::Completed);

    let stored = songs::list_for_artist(&harness.db, job.artist_id.unwrap())
        .await
        .unwrap();
    assert_eq!(stored.len(), 10);
    for song in &stored {
        assert!(song.liveness <= 0.8, "live track stored: {:?}", song);
        // Most popular candidate for RECn is track 40 + n
        let n: i64 = song.recording_id.trim_start_matches("REC").parse().unwrap();
        assert_eq!(song.popularity, 40 + n);
        assert_eq!(song.external_track_id.as_deref(), Some(format!("T{}", 40 + n).as_str()));
    }
}

#[tokio::test]
async fn test_popularity_tie_prefers_earliest_release() {
    let releases = vec![
        (album("NEW", 2010), vec![track("T-new", "REC1", 50, 0.1)]),
        (album("OLD", 1995), vec![track("T-old", "REC1", 50, 0.1)]),
    ];
    let music = FakeMusicCatalog::new(vec![music_artist("M1", "Phish")], releases);
    let harness = TestHarness::new(FakeEventCatalog::empty(), music).await;

    let job = import_to_end(&harness, "music:M1").await;

    let stored = songs::list_for_artist(&harness.db, job.artist_id.unwrap())
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].external_track_id.as_deref(), Some("T-old"));
}

#[tokio::test]
async fn test_event_catalog_outage_is_partial_failure() {
    let events = FakeEventCatalog::failing(CatalogError::Server {
        service: "event catalog".to_string(),
        status: 503,
    });
    let harness = TestHarness::new(events, studio_catalog()).await;

    let job = import_to_end(&harness, "music:M1").await;

    assert_eq!(job.status, JobStatus::PartialFailure);
    assert_eq!(job.counts.shows, 0);
    assert_eq!(job.failed_phases(), vec![ImportPhase::EventsVenues]);
    assert_eq!(job.phase_errors[0].items_imported, 0);
    assert!(job.error_detail.as_deref().unwrap().contains("events_venues"));

    // Catalog phase still ran
    assert_eq!(job.counts.songs, 12);
    assert!(harness.events.calls() >= 2, "retried before giving up");

    let artist = artists::load_artist(&harness.db, job.artist_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(artist.import_status, ArtistImportStatus::Partial);

    // The terminal event names the failed phase
    let events: Vec<_> = harness
        .coordinator
        .progress()
        .subscribe(job.id, 0)
        .await
        .unwrap()
        .collect()
        .await;
    let last = events.last().unwrap();
    assert_eq!(last.status, JobStatus::PartialFailure);
    assert!(last.message.contains("events_venues"));
}

#[tokio::test]
async fn test_failed_release_keeps_committed_songs() {
    let music = studio_catalog();
    music.fail_album(
        "A4",
        CatalogError::RateLimited {
            service: "music catalog".to_string(),
            retry_after: None,
        },
    );
    let harness = TestHarness::new(two_shows(), music).await;

    let job = import_to_end(&harness, "event:K1").await;

    assert_eq!(job.status, JobStatus::PartialFailure);
    assert_eq!(job.failed_phases(), vec![ImportPhase::StudioCatalog]);
    // A0-A3 hold ten recordings; A4's two never arrive
    assert_eq!(job.counts.songs, 10);
    assert_eq!(job.phase_errors[0].items_imported, 10);
    assert_eq!(job.counts.shows, 2);
}

#[tokio::test]
async fn test_rejected_credentials_fail_job() {
    let harness = TestHarness::new(two_shows(), studio_catalog()).await;
    harness.music.fail_with(Some(CatalogError::Unauthorized {
        service: "music catalog".to_string(),
        status: 401,
    }));

    let job = import_to_end(&harness, "event:K1").await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_phase, ImportPhase::StudioCatalog);
    assert!(job.error_detail.as_deref().unwrap().contains("401"));

    // Shows committed before the failure are kept; wrap-up never ran
    assert_eq!(shows::count_for_artist(&harness.db, job.artist_id.unwrap()).await.unwrap(), 2);
    assert_eq!(count_rows(&harness.db, "setlists").await, 0);

    let artist = artists::load_artist(&harness.db, job.artist_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(artist.import_status, ArtistImportStatus::Failed);
}

#[tokio::test]
async fn test_unknown_identity_creates_nothing() {
    let harness = TestHarness::new(two_shows(), studio_catalog()).await;

    let err = harness
        .coordinator
        .start(IdentityKey::event("NOPE").unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::IdentityNotFound { .. }));
    assert_eq!(count_rows(&harness.db, "artists").await, 0);
    assert_eq!(count_rows(&harness.db, "import_jobs").await, 0);
}

#[tokio::test]
async fn test_unconfigured_catalog_is_fatal_at_bootstrap() {
    let events = FakeEventCatalog::failing(CatalogError::NotConfigured("event catalog".to_string()));
    let harness = TestHarness::new(events, studio_catalog()).await;

    let err = harness
        .coordinator
        .start(IdentityKey::event("K1").unwrap())
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(count_rows(&harness.db, "import_jobs").await, 0);
}

#[tokio::test]
async fn test_events_without_date_or_venue() {
    let mut undated = event("E3", 5, Some("The Gorge"));
    undated.date = None;
    let events = FakeEventCatalog::new(
        vec![attraction("K1", "Phish")],
        vec![event("E1", 10, None), undated],
    );
    let harness = TestHarness::new(events, FakeMusicCatalog::empty()).await;
    let (logs, _guard) = LogCapture::install();

    let job = import_to_end(&harness, "event:K1").await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.counts.shows, 1);
    assert_eq!(logs.count_at(Level::WARN, "Skipping event without a date"), 1);

    let stored = shows::list_for_artist(&harness.db, job.artist_id.unwrap())
        .await
        .unwrap();
    let venue = venues::load_venue(&harness.db, stored[0].venue_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(venue.name, PLACEHOLDER_VENUE_NAME);
}

#[tokio::test]
async fn test_progress_log_ordering_and_replay() {
    let harness = TestHarness::new(two_shows(), studio_catalog()).await;
    let job = import_to_end(&harness, "event:K1").await;
    let progress = harness.coordinator.progress();

    let all: Vec<_> = progress.subscribe(job.id, 0).await.unwrap().collect().await;
    assert!(all.len() > 4);
    assert_eq!(all[0].sequence, 1);
    assert_eq!(all[0].phase, ImportPhase::Bootstrap);
    for pair in all.windows(2) {
        assert!(pair[1].sequence > pair[0].sequence);
        assert!(pair[1].percentage >= pair[0].percentage);
    }
    let terminal = all.last().unwrap();
    assert!(terminal.is_terminal());
    assert_eq!(terminal.percentage, 100.0);

    // Reconnect mid-log
    let resumed: Vec<_> = progress.subscribe(job.id, 3).await.unwrap().collect().await;
    assert_eq!(resumed.len(), all.len() - 3);
    assert!(resumed.iter().all(|e| e.sequence > 3));
    assert_eq!(resumed.last().unwrap().sequence, terminal.sequence);

    // Reconnect after the end
    let after_end: Vec<_> = progress
        .subscribe(job.id, terminal.sequence)
        .await
        .unwrap()
        .collect()
        .await;
    assert!(after_end.is_empty());
}

#[tokio::test]
async fn test_live_subscriber_sees_terminal_event() {
    let harness = TestHarness::new(two_shows(), studio_catalog()).await;

    let outcome = harness
        .coordinator
        .start(IdentityKey::event("K1").unwrap())
        .await
        .unwrap();
    let stream = harness
        .coordinator
        .progress()
        .subscribe(outcome.job_id, 0)
        .await
        .unwrap();

    let events: Vec<_> = tokio::time::timeout(Duration::from_secs(10), stream.collect::<Vec<_>>())
        .await
        .expect("stream ends after the terminal event");

    assert_eq!(events.last().unwrap().status, JobStatus::Completed);
    for pair in events.windows(2) {
        assert_eq!(pair[1].sequence, pair[0].sequence + 1);
    }
}

#[tokio::test]
async fn test_artist_outcome_visible_once_job_is_terminal() {
    for _ in 0..3 {
        let harness = TestHarness::new(two_shows(), studio_catalog()).await;
        let outcome = harness
            .coordinator
            .start(IdentityKey::event("K1").unwrap())
            .await
            .unwrap();

        // Read the artist the moment the job turns terminal
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let job = harness.coordinator.get_status(outcome.job_id).await.unwrap();
            if job.is_terminal() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "job still {}", job.status);
            tokio::task::yield_now().await;
        }

        let artist = artists::load_artist(&harness.db, outcome.artist_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(artist.import_status, ArtistImportStatus::Complete);
        assert!(artist.last_synced_at.is_some());
    }
}

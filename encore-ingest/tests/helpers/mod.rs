//! Test Helper Utilities
//!
//! Shared utilities for testing encore-ingest

#![allow(dead_code)]

pub mod catalogs;
pub mod db_utils;
pub mod log_capture;

pub use catalogs::{
    album, attraction, event, music_artist, track, FakeEventCatalog, FakeMusicCatalog,
    RecordingCacheInvalidator,
};
pub use db_utils::{count_rows, create_test_db, test_settings, wait_for_terminal, TestHarness};
pub use log_capture::LogCapture;

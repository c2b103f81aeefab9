//! # Encore Common Library
//!
//! Shared code for the Encore services including:
//! - Database initialization and the import pipeline schema
//! - Event types (EncoreEvent enum) and the in-process EventBus
//! - Import job / progress event types shared with UI consumers
//! - Configuration loading
//! - SSE helpers

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};

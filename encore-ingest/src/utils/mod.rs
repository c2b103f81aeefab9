//! Utility modules for encore-ingest

pub mod retry;
pub mod slug;

pub use retry::{retry_on_lock, RetryPolicy, Retryable};
pub use slug::{slug_candidates, slugify};

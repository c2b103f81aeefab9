//! HTTP API handlers for encore-ingest
//!
//! REST endpoints for starting imports and bulk refreshes, plus an SSE
//! stream of each job's progress log.

pub mod health;
pub mod import_workflow;
pub mod sse;
pub mod sync;

pub use health::health_routes;
pub use import_workflow::import_routes;
pub use sse::import_event_stream;
pub use sync::sync_routes;

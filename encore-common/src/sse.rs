//! Server-Sent Events (SSE) utilities
//!
//! Shared SSE helpers for Encore services.

use axum::response::sse::{Event, KeepAlive};
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

/// Interval between keep-alive comments on idle SSE connections
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Keep-alive configuration used by every Encore SSE endpoint
pub fn heartbeat_keep_alive() -> KeepAlive {
    KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat")
}

/// Build a named SSE event with a JSON payload
///
/// `id` becomes the SSE `id:` field, which browsers echo back in the
/// `Last-Event-ID` header when they reconnect.
///
/// Returns `None` (after logging) if the payload cannot be serialized.
pub fn json_event<T: Serialize>(event_type: &str, id: Option<String>, payload: &T) -> Option<Event> {
    match serde_json::to_string(payload) {
        Ok(data) => {
            let event = Event::default().event(event_type).data(data);
            Some(match id {
                Some(id) => event.id(id),
                None => event,
            })
        }
        Err(e) => {
            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
            None
        }
    }
}

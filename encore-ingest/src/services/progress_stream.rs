//! Per-job progress log with replay and live fan-out
//!
//! Appends are persisted to `progress_events` first and then announced on
//! the [`EventBus`]. Subscribers read the stored backlog, then follow the bus.
//! The store is authoritative: a subscriber that lags behind the bus, sees a
//! sequence gap, or hits its poll interval re-reads from the store. Delivery
//! is at-least-once from the log's point of view but each subscriber skips
//! sequences it already delivered, and the stream ends after the terminal
//! event.

use async_stream::stream;
use encore_common::events::{EncoreEvent, EventBus, ImportPhase, JobStatus, ProgressEvent};
use futures::Stream;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::db::{jobs, progress_events};
use crate::services::ImportError;

/// Store poll interval for subscribers
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ProgressStream {
    db: SqlitePool,
    event_bus: EventBus,
    poll_interval: Duration,
}

enum Next {
    Deliver(ProgressEvent),
    CatchUp,
    Idle,
}

impl ProgressStream {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self {
            db,
            event_bus,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Persist an event and broadcast it to live subscribers
    pub async fn append(
        &self,
        job_id: Uuid,
        phase: ImportPhase,
        status: JobStatus,
        percentage: f64,
        message: impl AsRef<str>,
    ) -> Result<ProgressEvent, ImportError> {
        let event =
            progress_events::append(&self.db, job_id, phase, status, percentage, message.as_ref())
                .await?;

        tracing::debug!(
            job_id = %job_id,
            sequence = event.sequence,
            phase = %event.phase,
            percentage = event.percentage,
            "Progress: {}",
            event.message
        );

        self.event_bus.emit_lossy(EncoreEvent::ImportProgress {
            event: event.clone(),
        });

        Ok(event)
    }

    /// Events with sequence greater than `last_seen`, then live events until
    /// the job's terminal event
    ///
    /// Fails with `JobNotFound` for an unknown job. Dropping the stream has no
    /// effect on the import.
    pub async fn subscribe(
        &self,
        job_id: Uuid,
        last_seen: i64,
    ) -> Result<impl Stream<Item = ProgressEvent> + Send + 'static, ImportError> {
        // Subscribe before reading the backlog so nothing falls in between
        let mut rx = self.event_bus.subscribe();

        if jobs::load_job(&self.db, job_id).await?.is_none() {
            return Err(ImportError::JobNotFound(job_id));
        }

        // Reconnect after the terminal event: nothing left to deliver
        let finished = progress_events::last_event(&self.db, job_id)
            .await?
            .is_some_and(|last| last.is_terminal() && last.sequence <= last_seen);

        let db = self.db.clone();
        let poll_interval = self.poll_interval;

        Ok(stream! {
            if finished {
                return;
            }

            let mut last = last_seen.max(0);
            let mut bus_open = true;
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.tick().await;

            let mut next = Next::CatchUp;
            loop {
                match next {
                    Next::Deliver(event) => {
                        if event.sequence == last + 1 {
                            last = event.sequence;
                            let terminal = event.is_terminal();
                            yield event;
                            if terminal {
                                return;
                            }
                        } else if event.sequence > last + 1 {
                            // Missed something on the bus; the store has it
                            next = Next::CatchUp;
                            continue;
                        }
                    }
                    Next::CatchUp => {
                        match progress_events::load_since(&db, job_id, last).await {
                            Ok(events) => {
                                for event in events {
                                    if event.sequence <= last {
                                        continue;
                                    }
                                    last = event.sequence;
                                    let terminal = event.is_terminal();
                                    yield event;
                                    if terminal {
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!(job_id = %job_id, error = %e, "Progress backlog read failed");
                            }
                        }
                    }
                    Next::Idle => {}
                }

                next = tokio::select! {
                    received = rx.recv(), if bus_open => match received {
                        Ok(EncoreEvent::ImportProgress { event }) if event.job_id == job_id => {
                            Next::Deliver(event)
                        }
                        Ok(_) => Next::Idle,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(job_id = %job_id, skipped, "Progress subscriber lagged, re-reading store");
                            Next::CatchUp
                        }
                        Err(RecvError::Closed) => {
                            bus_open = false;
                            Next::CatchUp
                        }
                    },
                    _ = ticker.tick() => Next::CatchUp,
                };
            }
        })
    }
}

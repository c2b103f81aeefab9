//! Phase 2: EVENTS & VENUES
//!
//! Pages through the artist's upcoming events in the event catalog. Each page
//! is committed (venues, then shows) before the cursor moves past it. Events
//! without a date are skipped; events with a missing or unnamed venue are
//! attached to a placeholder venue.

use chrono::NaiveDate;
use encore_common::events::ImportPhase;
use std::collections::HashSet;
use uuid::Uuid;

use super::{ImportCoordinator, PhaseContext, PhaseSummary};
use crate::clients::{CatalogEvent, DateRange, EventPage, EventVenue};
use crate::db::{shows, venues};
use crate::models::{CatalogSource, PhaseCursor, Show, Venue, PLACEHOLDER_VENUE_NAME};
use crate::services::ImportError;
use crate::utils::slugify;

/// Hard stop for artists with implausibly long listings
const MAX_EVENT_PAGES: u32 = 20;

impl ImportCoordinator {
    pub(super) async fn phase_events(&self, ctx: &mut PhaseContext) -> Result<PhaseSummary, ImportError> {
        let phase = ImportPhase::EventsVenues;
        tracing::info!(artist_id = %ctx.artist.id, "Phase 2: EVENTS & VENUES");

        let attraction_id = match self.resolve_catalog_id(ctx, CatalogSource::Event).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                self.report(ctx, phase, 1.0, "No event catalog listing; no shows imported")
                    .await?;
                return Ok(PhaseSummary::default());
            }
            Err(e) => return Err(e.into_phase_failure(phase, 0)),
        };

        let range = DateRange::upcoming(self.settings.event_window_days);
        let start_page = match ctx.resume_cursor() {
            Some(PhaseCursor::EventsVenues { next_page }) => next_page,
            _ => 0,
        };

        let mut summary = PhaseSummary::default();
        let mut venue_ids = HashSet::new();

        let first = self
            .executor
            .call("list_events_page", || {
                self.clients.events.list_events_page(&attraction_id, range, start_page)
            })
            .await
            .map_err(|e| ImportError::from_catalog(e).into_phase_failure(phase, summary.items))?;

        let total_pages = first.total_pages.min(MAX_EVENT_PAGES);
        if first.total_pages > MAX_EVENT_PAGES {
            tracing::warn!(
                artist_id = %ctx.artist.id,
                total_pages = first.total_pages,
                "Event listing truncated to {} pages",
                MAX_EVENT_PAGES
            );
        }

        self.store_event_page(ctx.artist.id, &first, &mut summary, &mut venue_ids)
            .await;
        self.checkpoint(ctx, PhaseCursor::EventsVenues { next_page: start_page + 1 })
            .await?;
        self.report(
            ctx,
            phase,
            page_fraction(start_page + 1, total_pages),
            format!("Imported {} shows", summary.items),
        )
        .await?;

        let remaining: Vec<u32> = (start_page + 1..total_pages).collect();
        for chunk in remaining.chunks(self.executor.concurrency()) {
            self.executor.pause().await;

            let pages = self
                .executor
                .run_batch("list_events_page", chunk, |page| {
                    self.clients.events.list_events_page(&attraction_id, range, *page)
                })
                .await;

            for (page_number, result) in chunk.iter().zip(pages) {
                let page = result
                    .map_err(|e| ImportError::from_catalog(e).into_phase_failure(phase, summary.items))?;

                self.store_event_page(ctx.artist.id, &page, &mut summary, &mut venue_ids)
                    .await;
                self.checkpoint(ctx, PhaseCursor::EventsVenues { next_page: page_number + 1 })
                    .await?;
            }

            let done = chunk.last().map_or(start_page + 1, |last| last + 1);
            self.report(
                ctx,
                phase,
                page_fraction(done, total_pages),
                format!("Imported {} shows", summary.items),
            )
            .await?;
        }

        summary.venues = venue_ids.len();
        self.report(
            ctx,
            phase,
            1.0,
            format!(
                "Imported {} shows at {} venues ({} skipped)",
                summary.items, summary.venues, summary.skipped
            ),
        )
        .await?;

        Ok(summary)
    }

    /// Write one page; per-event problems are logged and skipped
    async fn store_event_page(
        &self,
        artist_id: Uuid,
        page: &EventPage,
        summary: &mut PhaseSummary,
        venue_ids: &mut HashSet<Uuid>,
    ) {
        for event in &page.events {
            let Some(date) = event.date else {
                tracing::warn!(event_id = %event.external_id, "Skipping event without a date");
                summary.skipped += 1;
                continue;
            };

            match self.store_event(artist_id, event, date).await {
                Ok(venue_id) => {
                    summary.items += 1;
                    venue_ids.insert(venue_id);
                }
                Err(e) => {
                    tracing::warn!(event_id = %event.external_id, error = %e, "Failed to store event");
                    summary.skipped += 1;
                }
            }
        }
    }

    /// Upsert venue then show; returns the venue id
    async fn store_event(
        &self,
        artist_id: Uuid,
        event: &CatalogEvent,
        date: NaiveDate,
    ) -> Result<Uuid, ImportError> {
        let venue = venue_for_event(event.venue.as_ref());
        let venue_id = venues::upsert_venue(&self.db, &venue).await?;

        let show = Show {
            id: Uuid::new_v4(),
            external_id: event.external_id.clone(),
            artist_id,
            venue_id: Some(venue_id),
            name: event.name.clone(),
            date,
            ticket_url: event.ticket_url.clone(),
        };
        let (show_id, created) = shows::upsert_show(&self.db, &show).await?;

        tracing::trace!(show_id = %show_id, created, date = %date, "Stored show");
        Ok(venue_id)
    }
}

/// Venue record for an event, falling back to the placeholder name
fn venue_for_event(venue: Option<&EventVenue>) -> Venue {
    let fallback = EventVenue::default();
    let venue = venue.unwrap_or(&fallback);

    let name = venue
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(PLACEHOLDER_VENUE_NAME)
        .to_string();

    Venue {
        id: Uuid::new_v4(),
        external_id: venue.external_id.clone(),
        slug: slugify(&name),
        name,
        city: venue.city.clone(),
        region: venue.region.clone(),
        country: venue.country.clone(),
    }
}

fn page_fraction(pages_done: u32, total_pages: u32) -> f64 {
    if total_pages == 0 {
        1.0
    } else {
        f64::from(pages_done) / f64::from(total_pages)
    }
}

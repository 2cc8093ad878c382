//! Rail train-status updates from an external realtime provider.
//!
//! Unlike AVL progression these carry per-stop times directly, so the merge
//! is field-granular: an arrival-only message leaves stored departures
//! untouched. Stops are referenced by tiploc and resolved through a
//! process-wide cache that lives for the life of the process.

use chrono::{DateTime, NaiveTime, Utc};
use thiserror::Error;
use tracing::warn;

use crate::models::{
    darwin_journey_id, parse_date_only, project_time_on_date, DataSource, RealtimeJourneyStop,
    RealtimeStopTimeType, Stop, TrainStatusEvent,
};
use crate::store::StoreError;

use super::RealtimeContext;

#[derive(Debug, Error)]
pub enum RailError {
    #[error("Malformed train status field: {0}")]
    MalformedInput(String),
    #[error("No scheduled journey found for train UID {0}")]
    JourneyNotFound(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub async fn handle_train_status(
    ctx: &RealtimeContext,
    event: &TrainStatusEvent,
    now: DateTime<Utc>,
) -> Result<(), RailError> {
    let ssd_date = parse_date_only(&event.ssd)
        .ok_or_else(|| RailError::MalformedInput(format!("ssd {:?}", event.ssd)))?;
    let primary_identifier = darwin_journey_id(&event.ssd, &event.uid);

    // The journey lookup only happens on first contact; afterwards the
    // stored document already carries the reference.
    let journey_ref = match ctx
        .store
        .find_realtime_journey(&primary_identifier)
        .await?
    {
        Some(existing) => existing.journey_ref,
        None => {
            let candidates = ctx
                .store
                .find_journeys_by_other_identifier("TrainUID", &event.uid)
                .await?;
            candidates
                .into_iter()
                .filter(|j| j.availability.matches_date(ssd_date))
                .map(|j| j.primary_identifier)
                .next_back()
                .ok_or_else(|| RailError::JourneyNotFound(event.uid.clone()))?
        }
    };

    let mut stop_updates = Vec::new();
    for location in &event.locations {
        let Some(stop) = stop_from_tiploc(ctx, &location.tiploc).await? else {
            warn!(tiploc = %location.tiploc, "No stop for tiploc, skipping location update");
            continue;
        };

        let arrival = location
            .estimated_arrival
            .as_deref()
            .and_then(|t| rail_time_to_utc(t, ssd_date, ctx));
        let departure = location
            .estimated_departure
            .as_deref()
            .and_then(|t| rail_time_to_utc(t, ssd_date, ctx));
        if arrival.is_none() && departure.is_none() {
            continue;
        }

        stop_updates.push(RealtimeJourneyStop {
            stop_ref: stop.primary_identifier,
            time_type: RealtimeStopTimeType::EstimatedFuture,
            arrival_time: arrival,
            departure_time: departure,
        });
    }

    let data_source = event.data_source.clone().unwrap_or_else(|| DataSource {
        original_format: "rail-status".into(),
        provider: "National-Rail".into(),
        dataset_id: "rail-status".into(),
        timestamp: now.timestamp().to_string(),
    });

    ctx.store
        .merge_external_journey(
            &primary_identifier,
            &journey_ref,
            stop_updates,
            event.late_reason.clone(),
            data_source,
            now,
        )
        .await?;

    Ok(())
}

/// `HH:MM` within the service start date, in the feed's local timezone.
fn rail_time_to_utc(value: &str, ssd_date: chrono::NaiveDate, ctx: &RealtimeContext) -> Option<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(value, "%H:%M").ok()?;
    project_time_on_date(ssd_date, time, ctx.timezone)
}

async fn stop_from_tiploc(ctx: &RealtimeContext, tiploc: &str) -> Result<Option<Stop>, StoreError> {
    if let Some(cached) = ctx.tiploc_cache.lock().unwrap().get(tiploc) {
        return Ok(cached.clone());
    }
    let stop = ctx.store.find_stop_by_other_identifier("Tiploc", tiploc).await?;
    // Negative results are cached too; entries never expire.
    ctx.tiploc_cache
        .lock()
        .unwrap()
        .insert(tiploc.to_string(), stop.clone());
    Ok(stop)
}

//! Journey progression: project a vehicle position onto the journey's track,
//! work out how far ahead or behind schedule it is, and re-estimate every
//! remaining stop time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use crate::models::{
    project_time_on_date, realtime_journey_id, round_to_minute, Journey, Location,
    RealtimeJourneyStop, RealtimeStopTimeType, VehicleLocationEvent,
};
use crate::store::{RealtimeUpsert, StoreError};

use super::RealtimeContext;

#[derive(Debug, Error)]
pub enum ProgressionError {
    #[error("No scheduled journey found for {0}")]
    JourneyNotFound(String),
    #[error("Journey {0} has no track geometry, progression impossible")]
    NoTrack(String),
    #[error("Malformed timeframe {0:?}")]
    MalformedTimeframe(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Memoizes scheduled journeys between events. Entries expire after a TTL
/// and the map is size-bounded; negative lookups are cached too, so a feed
/// hammering an unknown journey ref does not hammer the store.
pub struct JourneyCache {
    entries: DashMap<String, CacheEntry>,
    capacity: usize,
    ttl: StdDuration,
}

struct CacheEntry {
    journey: Option<Arc<Journey>>,
    inserted_at: Instant,
}

impl JourneyCache {
    pub fn new(capacity: usize, ttl: StdDuration) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// `None` is a miss; `Some(None)` is a cached negative lookup.
    pub fn get(&self, journey_ref: &str) -> Option<Option<Arc<Journey>>> {
        let entry = self.entries.get(journey_ref)?;
        if entry.inserted_at.elapsed() >= self.ttl {
            drop(entry);
            self.entries.remove(journey_ref);
            return None;
        }
        Some(entry.journey.clone())
    }

    pub fn insert(&self, journey_ref: String, journey: Option<Arc<Journey>>) {
        if self.entries.len() >= self.capacity {
            self.entries
                .retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
            // Still full of fresh entries: drop an arbitrary one to stay
            // within the bound.
            if self.entries.len() >= self.capacity {
                if let Some(key) = self.entries.iter().next().map(|e| e.key().clone()) {
                    self.entries.remove(&key);
                }
            }
        }
        self.entries.insert(
            journey_ref,
            CacheEntry {
                journey,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The path item and in-track segment nearest to a reported position.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TrackPosition {
    path_index: usize,
    segment_index: usize,
}

/// Scan every segment of every path item for the closest approach. Items
/// without at least two track points carry no geometric signal and are
/// skipped entirely.
fn closest_track_position(journey: &Journey, location: &Location) -> Option<TrackPosition> {
    let mut best: Option<(TrackPosition, f64)> = None;
    for (path_index, item) in journey.path.iter().enumerate() {
        if item.track.len() < 2 {
            continue;
        }
        for segment_index in 0..item.track.len() - 1 {
            let distance = location
                .distance_from_line(&item.track[segment_index], &item.track[segment_index + 1]);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((
                    TrackPosition {
                        path_index,
                        segment_index,
                    },
                    distance,
                ));
            }
        }
    }
    best.map(|(position, _)| position)
}

/// Fraction of the matched path item already covered, from the index of the
/// matched segment. Monotone along the track: segments closer to the
/// destination give a strictly higher fraction.
fn percent_complete(journey: &Journey, position: TrackPosition) -> f64 {
    let track_len = journey.path[position.path_index].track.len();
    position.segment_index as f64 / (track_len - 1) as f64
}

pub async fn handle_vehicle_location(
    ctx: &RealtimeContext,
    event: &VehicleLocationEvent,
    now: DateTime<Utc>,
) -> Result<(), ProgressionError> {
    let journey = match ctx.journey_cache.get(&event.journey_ref) {
        Some(cached) => cached,
        None => {
            let fetched = ctx
                .store
                .find_journey(&event.journey_ref)
                .await?
                .map(Arc::new);
            ctx.journey_cache
                .insert(event.journey_ref.clone(), fetched.clone());
            fetched
        }
    };
    let Some(journey) = journey else {
        return Err(ProgressionError::JourneyNotFound(event.journey_ref.clone()));
    };

    let Some(position) = closest_track_position(&journey, &event.location) else {
        return Err(ProgressionError::NoTrack(event.journey_ref.clone()));
    };
    let matched_item = &journey.path[position.path_index];
    let fraction = percent_complete(&journey, position);

    let timeframe_date = crate::models::parse_date_only(&event.timeframe)
        .ok_or_else(|| ProgressionError::MalformedTimeframe(event.timeframe.clone()))?;

    let project = |time| project_time_on_date(timeframe_date, time, ctx.timezone);
    let (Some(origin_departure), Some(destination_arrival)) = (
        project(matched_item.origin_departure_time),
        project(matched_item.destination_arrival_time),
    ) else {
        return Err(ProgressionError::MalformedTimeframe(event.timeframe.clone()));
    };

    // Where the schedule says the vehicle should be at this fraction of the
    // segment, and how far off it actually is. Positive offset means late.
    let traversal = destination_arrival - origin_departure;
    let expected_at_position =
        origin_departure + Duration::seconds((fraction * traversal.num_seconds() as f64) as i64);
    let offset = now - expected_at_position;

    debug!(
        journey = %event.journey_ref,
        path_index = position.path_index,
        offset_seconds = offset.num_seconds(),
        "Progression offset computed"
    );

    // Re-estimate every stop from the matched item onwards. Departure from a
    // stop never precedes its arrival, and never undercuts the scheduled
    // departure of the following item.
    let mut stops = HashMap::new();
    for index in position.path_index..journey.path.len() {
        let item = &journey.path[index];
        let Some(scheduled_arrival) = project(item.destination_arrival_time) else {
            continue;
        };
        let arrival = round_to_minute(scheduled_arrival + offset);

        let departure = if index + 1 < journey.path.len() {
            let next_scheduled_departure = project(journey.path[index + 1].origin_departure_time);
            next_scheduled_departure.map(|scheduled| scheduled.max(arrival))
        } else {
            None
        };

        stops.insert(
            item.destination_stop_ref.clone(),
            RealtimeJourneyStop {
                stop_ref: item.destination_stop_ref.clone(),
                time_type: RealtimeStopTimeType::EstimatedFuture,
                arrival_time: Some(arrival),
                departure_time: departure,
            },
        );
    }

    let primary_identifier = realtime_journey_id(&event.timeframe, &event.journey_ref);
    ctx.store
        .upsert_vehicle_journey(
            RealtimeUpsert {
                primary_identifier,
                journey_ref: event.journey_ref.clone(),
                data_source: event.data_source.clone(),
                vehicle_location: Some(event.location),
                vehicle_bearing: event.bearing,
                departed_stop_ref: Some(matched_item.origin_stop_ref.clone()),
                next_stop_ref: Some(matched_item.destination_stop_ref.clone()),
                stops,
            },
            now,
        )
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataSource, JourneyPathItem};
    use crate::realtime::RealtimeContext;
    use crate::store::Store;
    use chrono::NaiveTime;

    fn hms(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn utc(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).unwrap().with_timezone(&Utc)
    }

    /// Three stops, two path items, scheduled 08:00 -> 08:10 -> 08:20.
    /// Each item's track runs due north with three points, so segment
    /// indices map cleanly onto fractions of the item.
    fn two_leg_journey() -> Journey {
        Journey {
            primary_identifier: "GB:JOURNEY:LEG".into(),
            service_ref: "GB:SERVICE:FOOB:42".into(),
            operator_ref: "GB:NOC:FOOB".into(),
            departure_time: hms(8, 0),
            path: vec![
                JourneyPathItem {
                    origin_stop_ref: "GB:ATCO:S1".into(),
                    destination_stop_ref: "GB:ATCO:S2".into(),
                    origin_arrival_time: hms(8, 0),
                    origin_departure_time: hms(8, 0),
                    destination_arrival_time: hms(8, 10),
                    track: vec![
                        Location::new(-1.0, 52.000),
                        Location::new(-1.0, 52.005),
                        Location::new(-1.0, 52.010),
                    ],
                    ..Default::default()
                },
                JourneyPathItem {
                    origin_stop_ref: "GB:ATCO:S2".into(),
                    destination_stop_ref: "GB:ATCO:S3".into(),
                    origin_arrival_time: hms(8, 10),
                    origin_departure_time: hms(8, 10),
                    destination_arrival_time: hms(8, 20),
                    track: vec![
                        Location::new(-1.0, 52.010),
                        Location::new(-1.0, 52.015),
                        Location::new(-1.0, 52.020),
                    ],
                    ..Default::default()
                },
            ],
            modification_datetime: Some(Utc::now()),
            ..Default::default()
        }
    }

    async fn context_with(journey: &Journey) -> RealtimeContext {
        let store = Store::connect_memory().await.unwrap();
        store.upsert_journey(journey).await.unwrap();
        RealtimeContext::new(
            store,
            chrono_tz::UTC,
            64,
            StdDuration::from_secs(30 * 60),
        )
    }

    fn location_event(journey_ref: &str, location: Location) -> VehicleLocationEvent {
        VehicleLocationEvent {
            journey_ref: journey_ref.into(),
            timeframe: "2024-06-10".into(),
            location,
            bearing: Some(0.0),
            data_source: DataSource {
                original_format: "siri-vm".into(),
                provider: "Test Provider".into(),
                dataset_id: "avl-feed".into(),
                timestamp: "100".into(),
            },
            observed_at: utc("2024-06-10T08:12:00Z"),
        }
    }

    #[test]
    fn closest_position_picks_item_and_segment() {
        let journey = two_leg_journey();
        // Midway along the second segment of the second item.
        let position =
            closest_track_position(&journey, &Location::new(-1.0, 52.0170)).unwrap();
        assert_eq!(position.path_index, 1);
        assert_eq!(position.segment_index, 1);
        assert_eq!(percent_complete(&journey, position), 0.5);
    }

    #[test]
    fn percent_complete_is_monotone_along_the_track() {
        let journey = two_leg_journey();
        let early = closest_track_position(&journey, &Location::new(-1.0, 52.0115)).unwrap();
        let late = closest_track_position(&journey, &Location::new(-1.0, 52.0185)).unwrap();
        assert!(percent_complete(&journey, early) < percent_complete(&journey, late));
    }

    #[tokio::test]
    async fn offset_and_estimates_follow_the_schedule() {
        // Vehicle at 50% of the second item: expected there at 08:15.
        // The clock says 08:17, so it is two minutes late and the final stop
        // estimate moves from 08:20 to 08:22.
        let journey = two_leg_journey();
        let ctx = context_with(&journey).await;
        let event = location_event("GB:JOURNEY:LEG", Location::new(-1.0, 52.0155));

        handle_vehicle_location(&ctx, &event, utc("2024-06-10T08:17:00Z"))
            .await
            .unwrap();

        let realtime = ctx
            .store
            .find_realtime_journey("2024-06-10:GB:JOURNEY:LEG")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(realtime.departed_stop_ref.as_deref(), Some("GB:ATCO:S2"));
        assert_eq!(realtime.next_stop_ref.as_deref(), Some("GB:ATCO:S3"));

        let final_stop = &realtime.stops["GB:ATCO:S3"];
        assert_eq!(final_stop.arrival_time, Some(utc("2024-06-10T08:22:00Z")));
        assert_eq!(final_stop.time_type, RealtimeStopTimeType::EstimatedFuture);
        // The terminal stop has no onward departure.
        assert!(final_stop.departure_time.is_none());
    }

    #[tokio::test]
    async fn departures_never_precede_arrivals() {
        let journey = two_leg_journey();
        let ctx = context_with(&journey).await;
        // Vehicle still on the first item, running five minutes late.
        let event = location_event("GB:JOURNEY:LEG", Location::new(-1.0, 52.0055));

        handle_vehicle_location(&ctx, &event, utc("2024-06-10T08:10:00Z"))
            .await
            .unwrap();

        let realtime = ctx
            .store
            .find_realtime_journey("2024-06-10:GB:JOURNEY:LEG")
            .await
            .unwrap()
            .unwrap();

        // Both stops estimated; every departure is at or after its arrival,
        // and no departure undercuts the next item's scheduled departure.
        let s2 = &realtime.stops["GB:ATCO:S2"];
        let arrival = s2.arrival_time.unwrap();
        let departure = s2.departure_time.unwrap();
        assert!(departure >= arrival);
        assert!(departure >= utc("2024-06-10T08:10:00Z"));
    }

    #[tokio::test]
    async fn early_vehicle_waits_for_scheduled_departure() {
        let journey = two_leg_journey();
        let ctx = context_with(&journey).await;
        // Vehicle past the midpoint of the first item at 08:02, where the
        // schedule only expects it at 08:05: three minutes early.
        let event = location_event("GB:JOURNEY:LEG", Location::new(-1.0, 52.0075));

        handle_vehicle_location(&ctx, &event, utc("2024-06-10T08:02:00Z"))
            .await
            .unwrap();

        let realtime = ctx
            .store
            .find_realtime_journey("2024-06-10:GB:JOURNEY:LEG")
            .await
            .unwrap()
            .unwrap();
        let s2 = &realtime.stops["GB:ATCO:S2"];
        // Arrival estimated early, but departure holds at the 08:10 schedule.
        assert!(s2.arrival_time.unwrap() < utc("2024-06-10T08:10:00Z"));
        assert_eq!(s2.departure_time, Some(utc("2024-06-10T08:10:00Z")));
    }

    #[tokio::test]
    async fn journey_without_track_drops_the_event() {
        let mut journey = two_leg_journey();
        for item in &mut journey.path {
            item.track.clear();
        }
        let ctx = context_with(&journey).await;
        let event = location_event("GB:JOURNEY:LEG", Location::new(-1.0, 52.005));

        let result = handle_vehicle_location(&ctx, &event, utc("2024-06-10T08:05:00Z")).await;
        assert!(matches!(result, Err(ProgressionError::NoTrack(_))));
        assert!(ctx
            .store
            .find_realtime_journey("2024-06-10:GB:JOURNEY:LEG")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unknown_journey_drops_the_event_and_caches_the_miss() {
        let ctx = context_with(&two_leg_journey()).await;
        let event = location_event("GB:JOURNEY:GHOST", Location::new(-1.0, 52.005));

        let result = handle_vehicle_location(&ctx, &event, Utc::now()).await;
        assert!(matches!(result, Err(ProgressionError::JourneyNotFound(_))));
        // The negative lookup is now cached.
        assert_eq!(ctx.journey_cache.get("GB:JOURNEY:GHOST"), Some(None));
    }

    #[test]
    fn cache_expires_and_respects_capacity() {
        let cache = JourneyCache::new(2, StdDuration::from_secs(0));
        cache.insert("a".into(), None);
        // Zero TTL: immediately expired.
        assert!(cache.get("a").is_none());

        let cache = JourneyCache::new(2, StdDuration::from_secs(60));
        cache.insert("a".into(), None);
        cache.insert("b".into(), None);
        cache.insert("c".into(), None);
        assert!(cache.len() <= 2);
    }
}

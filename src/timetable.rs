//! Timetable generation: expand scheduled journeys into concrete-dated stop
//! events for one stop, overriding with live estimates where an active
//! realtime journey exists. The departure board composes today's window
//! with tomorrow's when today alone cannot fill the requested count.

use chrono::{DateTime, Days, Duration, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::{project_time_on_date, realtime_journey_id, Journey};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum TimetableRecordType {
    Scheduled,
    RealtimeEstimate,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ServiceView {
    pub primary_identifier: String,
    pub service_name: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OperatorView {
    pub primary_identifier: String,
    pub primary_name: String,
}

/// The slice of a journey a departure board needs, with its service and
/// operator attached by the handler's resolver rather than hung off the
/// entity itself.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JourneyView {
    pub primary_identifier: String,
    pub direction: String,
    #[schema(value_type = String)]
    pub departure_time: NaiveTime,
    pub service: Option<ServiceView>,
    pub operator: Option<OperatorView>,
    /// Raw references carried for the resolver; not serialized.
    #[serde(skip)]
    pub service_ref: String,
    #[serde(skip)]
    pub operator_ref: String,
}

impl JourneyView {
    fn from_journey(journey: &Journey) -> Self {
        Self {
            primary_identifier: journey.primary_identifier.clone(),
            direction: journey.direction.clone(),
            departure_time: journey.departure_time,
            service: None,
            operator: None,
            service_ref: journey.service_ref.clone(),
            operator_ref: journey.operator_ref.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TimetableRecord {
    pub journey: JourneyView,
    pub stop_ref: String,
    pub time: DateTime<Utc>,
    pub time_type: TimetableRecordType,
    pub destination_display: String,
}

/// One window of timetable records for a stop. Output order is unspecified;
/// the caller sorts after composing windows.
#[allow(clippy::too_many_arguments)]
pub async fn generate_timetable(
    store: &Store,
    journeys: &[Journey],
    stop_ref: &str,
    start: DateTime<Utc>,
    realtime_timeframe: &str,
    today_scope: bool,
    timezone: Tz,
    active_cutoff: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<TimetableRecord>, StoreError> {
    let date = start.with_timezone(&timezone).date_naive();
    let mut records = Vec::new();

    for journey in journeys {
        if !journey.availability.matches_date(date) {
            continue;
        }

        // The stop is normally an origin somewhere along the path; a stop
        // that only appears as the final destination uses the last item.
        let item = journey
            .path
            .iter()
            .find(|p| p.origin_stop_ref == stop_ref)
            .or_else(|| {
                journey
                    .path
                    .last()
                    .filter(|p| p.destination_stop_ref == stop_ref)
            });
        let Some(item) = item else {
            continue;
        };

        let Some(mut time) = project_time_on_date(date, journey.departure_time, timezone) else {
            continue;
        };
        // Departures already gone today stay gone; they do not wrap around
        // to tomorrow.
        if today_scope && time < start {
            continue;
        }

        let mut time_type = TimetableRecordType::Scheduled;
        let realtime_id = realtime_journey_id(realtime_timeframe, &journey.primary_identifier);
        if let Some(realtime) = store
            .find_active_realtime_journey(&realtime_id, now, active_cutoff)
            .await?
        {
            if let Some(estimate) = realtime.stops.get(stop_ref) {
                if let Some(estimated) = estimate.departure_time.or(estimate.arrival_time) {
                    time = estimated;
                    time_type = TimetableRecordType::RealtimeEstimate;
                }
            }
        }

        let destination_display = if journey.destination_display.is_empty() {
            item.destination_display.clone()
        } else {
            journey.destination_display.clone()
        };

        records.push(TimetableRecord {
            journey: JourneyView::from_journey(journey),
            stop_ref: stop_ref.to_string(),
            time,
            time_type,
            destination_display,
        });
    }

    Ok(records)
}

/// The departure board for a stop: today's departures from `start`, rolled
/// into tomorrow when today cannot fill `count`, sorted and truncated.
pub async fn departure_board(
    store: &Store,
    stop_ref: &str,
    count: usize,
    start: DateTime<Utc>,
    timezone: Tz,
    active_cutoff: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<TimetableRecord>, StoreError> {
    let candidates = store.journeys_calling_at(stop_ref).await?;
    let realtime_timeframe = start
        .with_timezone(&timezone)
        .date_naive()
        .format("%Y-%m-%d")
        .to_string();

    let mut records = generate_timetable(
        store,
        &candidates,
        stop_ref,
        start,
        &realtime_timeframe,
        true,
        timezone,
        active_cutoff,
        now,
    )
    .await?;
    records.sort_by_key(|r| r.time);

    if records.len() < count {
        let tomorrow_midnight = start
            .with_timezone(&timezone)
            .date_naive()
            .checked_add_days(Days::new(1))
            .and_then(|d| project_time_on_date(d, NaiveTime::MIN, timezone));
        if let Some(tomorrow_start) = tomorrow_midnight {
            let tomorrow = generate_timetable(
                store,
                &candidates,
                stop_ref,
                tomorrow_start,
                &realtime_timeframe,
                false,
                timezone,
                active_cutoff,
                now,
            )
            .await?;
            records.extend(tomorrow);
        }
    }

    records.sort_by_key(|r| r.time);
    records.truncate(count);
    Ok(records)
}

#[cfg(test)]
fn falls_on_date(record: &TimetableRecord, date: chrono::NaiveDate, tz: Tz) -> bool {
    record.time.with_timezone(&tz).date_naive() == date
}

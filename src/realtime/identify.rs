//! Journey identification: map the partial identifying fields of a live
//! vehicle report to at most one scheduled journey.
//!
//! Resolution is staged: operator, then service, then journey candidates by
//! progressively weaker keys. Every candidate set is narrowed by structural
//! dedup and departure-time matching before it is accepted.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use regex::Regex;
use thiserror::Error;

use crate::models::{parse_date_only, parse_xsd_datetime, Journey, VehicleActivityEvent};
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum IdentifyError {
    #[error("Could not find referenced operator")]
    OperatorNotFound,
    #[error("Could not find related service")]
    ServiceNotFound,
    #[error("Could not find related journeys")]
    JourneyNotFound,
    #[error("Could not narrow journeys by departure time, none remain")]
    NoTimeMatch,
    #[error("Could not narrow journeys by departure time, multiple remain")]
    AmbiguousMatch,
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Framed dates before this year are treated as garbage from the feed and
/// replaced with today.
const MIN_FRAMED_YEAR: i32 = 2022;

/// Exact departure-time matching is widened to this many minutes either side
/// when nothing matches to the minute.
const ALLOWED_MINUTE_OFFSET: i64 = 5;

pub async fn identify_journey(
    store: &Store,
    activity: &VehicleActivityEvent,
    timezone: Tz,
    now: DateTime<Utc>,
) -> Result<String, IdentifyError> {
    // The operator is determined solely by OperatorRef; operator-group
    // expansion is deliberately not performed.
    let operator_ref = activity.operator_ref.as_deref().unwrap_or_default();
    let operator = store
        .find_operator_by_any_identifier(operator_ref)
        .await?
        .ok_or(IdentifyError::OperatorNotFound)?;
    let operator_pool = operator.other_identifiers;

    // Service resolution, with a trailing-digits fallback for names like
    // "X15" published as "15" (or vice versa) by some feeds.
    let service_name = activity
        .published_line_name
        .as_deref()
        .filter(|s| !s.is_empty())
        .or(activity.service_name_ref.as_deref())
        .unwrap_or_default();

    let mut services = store
        .find_services_by_name_and_operators(service_name, &operator_pool)
        .await?;
    if services.is_empty() {
        let trailing_digits = Regex::new(r"^\D+(\d+)$").expect("static regex");
        if let Some(captures) = trailing_digits.captures(service_name) {
            services = store
                .find_services_by_name_and_operators(&captures[1], &operator_pool)
                .await?;
        }
    }
    if services.is_empty() {
        return Err(IdentifyError::ServiceNotFound);
    }
    let service_refs: Vec<String> = services
        .into_iter()
        .map(|s| s.primary_identifier)
        .collect();

    let framed_date = framed_journey_date(
        activity.framed_vehicle_journey_date.as_deref(),
        now.with_timezone(&timezone).date_naive(),
    );

    // Stage (a): the ticket machine journey code.
    if let Some(vehicle_journey_ref) = activity
        .vehicle_journey_ref
        .as_deref()
        .filter(|s| !s.is_empty())
    {
        let candidates = available_on(
            store
                .journey_candidates_by_code(&service_refs, "TicketMachineJourneyCode", vehicle_journey_ref)
                .await?,
            framed_date,
        );
        if let Ok(journey) = narrow_journeys(activity, timezone, candidates) {
            return Ok(journey.primary_identifier);
        }
    }

    // Stage (b): the block number, which some feeds misuse as a journey key.
    if let Some(block_ref) = activity.block_ref.as_deref().filter(|s| !s.is_empty()) {
        let candidates = available_on(
            store
                .journey_candidates_by_code(&service_refs, "BlockNumber", block_ref)
                .await?,
            framed_date,
        );
        if let Ok(journey) = narrow_journeys(activity, timezone, candidates) {
            return Ok(journey.primary_identifier);
        }
    }

    // Stage (c): journeys starting at the reported origin or ending at the
    // reported destination.
    let origin_ref = activity.origin_ref.as_deref().unwrap_or_default();
    let destination_ref = activity.destination_ref.as_deref().unwrap_or_default();
    let mut candidates = Vec::new();
    for service_ref in &service_refs {
        candidates.extend(
            store
                .journey_candidates_by_terminus(service_ref, origin_ref, destination_ref)
                .await?,
        );
    }
    let candidates = available_on(candidates, framed_date);

    narrow_journeys(activity, timezone, candidates).map(|j| j.primary_identifier)
}

fn framed_journey_date(framed: Option<&str>, today: NaiveDate) -> NaiveDate {
    match framed.and_then(parse_date_only) {
        Some(date) if date.year() >= MIN_FRAMED_YEAR => date,
        _ => today,
    }
}

fn available_on(journeys: Vec<Journey>, date: NaiveDate) -> Vec<Journey> {
    journeys
        .into_iter()
        .filter(|j| j.availability.matches_date(date))
        .collect()
}

/// Reduce a candidate set to exactly one journey.
///
/// Structural duplicates collapse first. A lone survivor wins outright.
/// Otherwise the aimed departure time decides: exact hour-and-minute match,
/// then a ±5 minute window restricted to candidates that share the reported
/// origin or destination stop.
fn narrow_journeys(
    activity: &VehicleActivityEvent,
    timezone: Tz,
    journeys: Vec<Journey>,
) -> Result<Journey, IdentifyError> {
    let mut journeys = Journey::dedup_identical(journeys);

    match journeys.len() {
        0 => return Err(IdentifyError::JourneyNotFound),
        1 => return Ok(journeys.remove(0)),
        _ => {}
    }

    let aimed_departure = activity
        .origin_aimed_departure_time
        .as_deref()
        .and_then(parse_xsd_datetime)
        .map(|dt| dt.with_timezone(&timezone));

    let mut time_filtered: Vec<Journey> = match &aimed_departure {
        Some(aimed) => journeys
            .iter()
            .filter(|j| {
                j.departure_time.hour() == aimed.hour() && j.departure_time.minute() == aimed.minute()
            })
            .cloned()
            .collect(),
        None => Vec::new(),
    };

    if time_filtered.is_empty() {
        if let Some(aimed) = &aimed_departure {
            let aimed_day_minutes = (aimed.hour() * 60 + aimed.minute()) as i64;
            let origin_ref = activity.origin_ref.as_deref().unwrap_or_default();
            let destination_ref = activity.destination_ref.as_deref().unwrap_or_default();

            for journey in &journeys {
                let Some(first) = journey.path.first() else {
                    continue;
                };
                let Some(last) = journey.path.last() else {
                    continue;
                };
                // The widened window only applies when the journey shares at
                // least one terminus with the report.
                if first.origin_stop_ref != origin_ref && last.destination_stop_ref != destination_ref
                {
                    continue;
                }

                let journey_day_minutes =
                    (journey.departure_time.hour() * 60 + journey.departure_time.minute()) as i64;
                if (aimed_day_minutes - journey_day_minutes).abs() <= ALLOWED_MINUTE_OFFSET {
                    time_filtered.push(journey.clone());
                }
            }
        }
    }

    match time_filtered.len() {
        0 => Err(IdentifyError::NoTimeMatch),
        1 => Ok(time_filtered.remove(0)),
        _ => Err(IdentifyError::AmbiguousMatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::availability::{Availability, AvailabilityRule};
    use crate::models::{JourneyPathItem, Operator, Service};
    use chrono::NaiveTime;
    use chrono_tz::Europe::London;
    use std::collections::HashMap;

    fn hms(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn weekday_availability() -> Availability {
        Availability {
            match_rules: vec![AvailabilityRule {
                rule_type: "DaysOfWeek".into(),
                value: "Monday,Tuesday,Wednesday,Thursday,Friday".into(),
                description: String::new(),
            }],
            ..Default::default()
        }
    }

    fn journey(id: &str, departure: NaiveTime, codes: &[(&str, &str)]) -> Journey {
        Journey {
            primary_identifier: id.into(),
            other_identifiers: codes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            service_ref: "GB:SERVICE:FOOB:42".into(),
            operator_ref: "GB:NOC:FOOB".into(),
            direction: "outbound".into(),
            departure_time: departure,
            destination_display: "Town Centre".into(),
            availability: weekday_availability(),
            path: vec![JourneyPathItem {
                origin_stop_ref: "GB:ATCO:ORIGIN".into(),
                destination_stop_ref: "GB:ATCO:END".into(),
                origin_arrival_time: departure,
                origin_departure_time: departure,
                destination_arrival_time: hms(departure.hour() + 1, departure.minute()),
                ..Default::default()
            }],
            modification_datetime: Some(Utc::now()),
            ..Default::default()
        }
    }

    async fn seeded_store() -> Store {
        let store = Store::connect_memory().await.unwrap();

        let operator = Operator {
            primary_identifier: "GB:NOC:FOOB".into(),
            other_identifiers: vec!["GB:NOC:FOOB".into(), "FOOB".into()],
            primary_name: "Foo Buses".into(),
            modification_datetime: Some(Utc::now()),
            ..Default::default()
        };
        store.upsert_operator(&operator).await.unwrap();

        for (id, name) in [("GB:SERVICE:FOOB:42", "42"), ("GB:SERVICE:FOOB:15", "15")] {
            let service = Service {
                primary_identifier: id.into(),
                service_name: name.into(),
                operator_ref: "GB:NOC:FOOB".into(),
                modification_datetime: Some(Utc::now()),
                ..Default::default()
            };
            store.upsert_service(&service).await.unwrap();
        }

        // Two journeys sharing a ticket machine code but departing at
        // different times, so narrowing has real work to do.
        store
            .upsert_journey(&journey("GB:JOURNEY:0815", hms(8, 15), &[
                ("TicketMachineJourneyCode", "VJ-001"),
            ]))
            .await
            .unwrap();
        store
            .upsert_journey(&journey("GB:JOURNEY:0940", hms(9, 40), &[
                ("TicketMachineJourneyCode", "VJ-001"),
            ]))
            .await
            .unwrap();

        store
    }

    fn base_activity() -> VehicleActivityEvent {
        VehicleActivityEvent {
            operator_ref: Some("GB:NOC:FOOB".into()),
            published_line_name: Some("42".into()),
            vehicle_journey_ref: Some("VJ-001".into()),
            origin_ref: Some("GB:ATCO:ORIGIN".into()),
            origin_aimed_departure_time: Some("2024-06-10T08:15:00+01:00".into()),
            framed_vehicle_journey_date: Some("2024-06-10".into()),
            ..Default::default()
        }
    }

    // 2024-06-10 is a Monday; 08:55 London is 07:55 UTC.
    fn monday_morning() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-10T07:55:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn identifies_by_ticket_machine_code_and_exact_time() {
        let store = seeded_store().await;
        let result = identify_journey(&store, &base_activity(), London, monday_morning()).await;
        assert_eq!(result.unwrap(), "GB:JOURNEY:0815");
    }

    #[tokio::test]
    async fn identification_is_repeatable() {
        let store = seeded_store().await;
        let first = identify_journey(&store, &base_activity(), London, monday_morning())
            .await
            .unwrap();
        let second = identify_journey(&store, &base_activity(), London, monday_morning())
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn widened_window_accepts_four_minute_deviation_with_matching_origin() {
        let store = seeded_store().await;
        let mut activity = base_activity();
        activity.origin_aimed_departure_time = Some("2024-06-10T08:19:00+01:00".into());
        let result = identify_journey(&store, &activity, London, monday_morning()).await;
        assert_eq!(result.unwrap(), "GB:JOURNEY:0815");
    }

    #[tokio::test]
    async fn six_minute_deviation_is_no_time_match() {
        let store = seeded_store().await;
        let mut activity = base_activity();
        activity.origin_aimed_departure_time = Some("2024-06-10T08:21:00+01:00".into());
        let result = identify_journey(&store, &activity, London, monday_morning()).await;
        assert!(matches!(result, Err(IdentifyError::NoTimeMatch)));
    }

    #[tokio::test]
    async fn widened_window_requires_matching_terminus() {
        let store = seeded_store().await;
        let mut activity = base_activity();
        activity.origin_aimed_departure_time = Some("2024-06-10T08:19:00+01:00".into());
        activity.origin_ref = Some("GB:ATCO:ELSEWHERE".into());
        activity.destination_ref = Some("GB:ATCO:ELSEWHERE".into());
        let result = identify_journey(&store, &activity, London, monday_morning()).await;
        assert!(matches!(result, Err(IdentifyError::NoTimeMatch)));
    }

    #[tokio::test]
    async fn unavailable_journeys_are_filtered_by_framed_date() {
        let store = seeded_store().await;
        let mut activity = base_activity();
        // A Saturday: the weekday-only journeys do not run.
        activity.framed_vehicle_journey_date = Some("2024-06-15".into());
        let result = identify_journey(&store, &activity, London, monday_morning()).await;
        assert!(matches!(result, Err(IdentifyError::JourneyNotFound)));
    }

    #[tokio::test]
    async fn garbage_framed_date_falls_back_to_today() {
        let store = seeded_store().await;
        let mut activity = base_activity();
        // Pre-2022 dates come from broken frames; today (a Monday) is used.
        activity.framed_vehicle_journey_date = Some("1970-01-01".into());
        let result = identify_journey(&store, &activity, London, monday_morning()).await;
        assert_eq!(result.unwrap(), "GB:JOURNEY:0815");
    }

    #[tokio::test]
    async fn service_name_regex_fallback() {
        let store = seeded_store().await;
        let mut fallback_journey = journey("GB:JOURNEY:X15", hms(8, 15), &[
            ("TicketMachineJourneyCode", "VJ-X15"),
        ]);
        fallback_journey.service_ref = "GB:SERVICE:FOOB:15".into();
        store.upsert_journey(&fallback_journey).await.unwrap();

        let mut activity = base_activity();
        // No service is named "X15"; the trailing digits find service "15".
        activity.published_line_name = Some("X15".into());
        activity.vehicle_journey_ref = Some("VJ-X15".into());
        let result = identify_journey(&store, &activity, London, monday_morning()).await;
        assert_eq!(result.unwrap(), "GB:JOURNEY:X15");
    }

    #[tokio::test]
    async fn unknown_operator_is_an_error() {
        let store = seeded_store().await;
        let mut activity = base_activity();
        activity.operator_ref = Some("GB:NOC:NOPE".into());
        let result = identify_journey(&store, &activity, London, monday_morning()).await;
        assert!(matches!(result, Err(IdentifyError::OperatorNotFound)));
    }

    #[tokio::test]
    async fn unknown_service_is_an_error() {
        let store = seeded_store().await;
        let mut activity = base_activity();
        activity.published_line_name = Some("99".into());
        let result = identify_journey(&store, &activity, London, monday_morning()).await;
        assert!(matches!(result, Err(IdentifyError::ServiceNotFound)));
    }

    #[tokio::test]
    async fn block_ref_fallback_identifies() {
        let store = seeded_store().await;
        store
            .upsert_journey(&journey("GB:JOURNEY:BLOCK", hms(10, 0), &[("BlockNumber", "B7")]))
            .await
            .unwrap();

        let mut activity = base_activity();
        activity.vehicle_journey_ref = None;
        activity.block_ref = Some("B7".into());
        activity.origin_aimed_departure_time = Some("2024-06-10T10:00:00+01:00".into());
        let result = identify_journey(&store, &activity, London, monday_morning()).await;
        assert_eq!(result.unwrap(), "GB:JOURNEY:BLOCK");
    }

    #[tokio::test]
    async fn structural_duplicates_collapse_before_time_matching() {
        let store = seeded_store().await;
        // Two rows describing the same run under different keys. After the
        // functional-hash dedup a single candidate remains, so it wins even
        // with no aimed departure time to narrow by.
        for id in ["GB:JOURNEY:DUP-A", "GB:JOURNEY:DUP-B"] {
            store
                .upsert_journey(&journey(id, hms(14, 0), &[("TicketMachineJourneyCode", "VJ-DUP")]))
                .await
                .unwrap();
        }

        let mut activity = base_activity();
        activity.vehicle_journey_ref = Some("VJ-DUP".into());
        activity.origin_aimed_departure_time = None;
        let result = identify_journey(&store, &activity, London, monday_morning())
            .await
            .unwrap();
        assert!(result.starts_with("GB:JOURNEY:DUP-"));
    }
}

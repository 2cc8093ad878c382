//! The canonical transport data model.
//!
//! Every source format is converted into these entities at import; everything
//! downstream (identification, progression, timetables) speaks only this
//! model.

pub mod availability;
pub mod journey;
pub mod location;
pub mod operator;
pub mod realtime;
pub mod service;
pub mod stop;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

pub use availability::{Availability, AvailabilityRule};
pub use journey::{Journey, JourneyPathItem, PathItemActivity};
pub use location::Location;
pub use operator::{Operator, OperatorGroup};
pub use realtime::{
    darwin_journey_id, realtime_journey_id, RealtimeEvent, RealtimeJourney, RealtimeJourneyStop,
    RealtimeStopTimeType, Reliability, TrainStatusEvent, TrainStatusLocation,
    VehicleActivityEvent, VehicleLocationEvent,
};
pub use service::Service;
pub use stop::{Stop, StopGroup};

/// Which ingestion batch a document came from. Equality of the quadruple
/// identifies a batch; stale-record cleanup matches the first three fields
/// and deletes other timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub original_format: String,
    pub provider: String,
    pub dataset_id: String,
    /// Opaque batch tag, an ingestion-time unix timestamp in practice.
    pub timestamp: String,
}

/// Parse an XSD datetime, with or without fractional seconds.
pub fn parse_xsd_datetime(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value).ok()
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date_only(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

/// Project a schedule time-of-day onto a concrete date in the given
/// timezone, yielding the instant in UTC. `None` only for local times that
/// do not exist (spring-forward DST gap).
pub fn project_time_on_date(
    date: NaiveDate,
    time: chrono::NaiveTime,
    tz: chrono_tz::Tz,
) -> Option<chrono::DateTime<chrono::Utc>> {
    use chrono::TimeZone;
    tz.from_local_datetime(&chrono::NaiveDateTime::new(date, time))
        .earliest()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Round an instant to the nearest whole minute.
pub fn round_to_minute(dt: chrono::DateTime<chrono::Utc>) -> chrono::DateTime<chrono::Utc> {
    let rounded = (dt.timestamp() + 30).div_euclid(60) * 60;
    chrono::DateTime::from_timestamp(rounded, 0).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_xsd_datetime_with_offset() {
        let dt = parse_xsd_datetime("2024-06-10T08:15:00+01:00").unwrap();
        assert_eq!(dt.hour(), 8);
        assert_eq!(dt.offset().local_minus_utc(), 3600);
    }

    #[test]
    fn parses_xsd_datetime_with_fractional_seconds() {
        let dt = parse_xsd_datetime("2024-06-10T08:15:00.123456+01:00").unwrap();
        assert_eq!(dt.hour(), 8);
    }

    #[test]
    fn rejects_malformed_datetime() {
        assert!(parse_xsd_datetime("2024-06-10 08:15").is_none());
        assert!(parse_xsd_datetime("").is_none());
    }

    #[test]
    fn parses_date_only() {
        let date = parse_date_only("2024-06-10").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        assert!(parse_date_only("10/06/2024").is_none());
    }

    #[test]
    fn projects_local_time_to_utc() {
        // June in London is BST, one hour ahead of UTC.
        let date = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let time = chrono::NaiveTime::from_hms_opt(8, 15, 0).unwrap();
        let dt = project_time_on_date(date, time, chrono_tz::Europe::London).unwrap();
        assert_eq!(dt.hour(), 7);

        // January is GMT.
        let date = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let dt = project_time_on_date(date, time, chrono_tz::Europe::London).unwrap();
        assert_eq!(dt.hour(), 8);
    }

    #[test]
    fn rounds_to_nearest_minute() {
        let base = parse_xsd_datetime("2024-06-10T08:21:00+00:00")
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert_eq!(round_to_minute(base + chrono::Duration::seconds(29)), base);
        assert_eq!(
            round_to_minute(base + chrono::Duration::seconds(31)),
            base + chrono::Duration::minutes(1)
        );
        assert_eq!(round_to_minute(base), base);
    }
}

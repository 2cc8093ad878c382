//! The canonical AVL adapter: a JSON document carrying an array of vehicle
//! activity reports. Records are decoded individually (bad ones are logged
//! and dropped) and anything recorded too long ago is discarded before it
//! ever reaches the queue.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::models::{parse_xsd_datetime, VehicleActivityEvent};

use super::super::ImportError;

/// Reports older than this are stale on arrival and never queued.
const MAX_RECORD_AGE_MINUTES: i64 = 20;

#[derive(Debug, Deserialize)]
struct AvlDocument {
    #[serde(default)]
    vehicle_activities: Vec<Value>,
}

pub fn parse(data: &[u8], now: DateTime<Utc>) -> Result<Vec<VehicleActivityEvent>, ImportError> {
    let document: AvlDocument = serde_json::from_slice(data)
        .map_err(|e| ImportError::MalformedInput(format!("document root: {e}")))?;

    let retrieved = document.vehicle_activities.len();
    let mut events = Vec::with_capacity(retrieved);
    let mut stale = 0usize;
    let mut failed = 0usize;

    for value in document.vehicle_activities {
        let event: VehicleActivityEvent = match serde_json::from_value(value) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Skipping undecodable vehicle activity record");
                failed += 1;
                continue;
            }
        };

        if let Some(recorded_at) = event
            .recorded_at
            .as_deref()
            .and_then(parse_xsd_datetime)
        {
            if now - recorded_at.with_timezone(&Utc) > Duration::minutes(MAX_RECORD_AGE_MINUTES) {
                stale += 1;
                continue;
            }
        }

        events.push(event);
    }

    info!(
        retrieved,
        submitted = events.len(),
        stale,
        failed,
        "Parsed AVL document"
    );
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(recorded_at: &str) -> serde_json::Value {
        serde_json::json!({
            "operator_ref": "GB:NOC:FOOB",
            "published_line_name": "42",
            "vehicle_journey_ref": "VJ-001",
            "location": {"longitude": -1.0, "latitude": 52.0},
            "recorded_at": recorded_at
        })
    }

    #[test]
    fn parses_and_drops_stale_records() {
        let now = DateTime::parse_from_rfc3339("2024-06-10T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let document = serde_json::json!({
            "vehicle_activities": [
                activity("2024-06-10T08:25:00+00:00"),
                // 25 minutes old: dropped.
                activity("2024-06-10T08:05:00+00:00"),
                // Undecodable location: dropped with a warning.
                {"operator_ref": "GB:NOC:FOOB", "location": "not a point"}
            ]
        });

        let events = parse(document.to_string().as_bytes(), now).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].vehicle_journey_ref.as_deref(), Some("VJ-001"));
    }

    #[test]
    fn record_without_timestamp_is_kept() {
        let now = Utc::now();
        let document = serde_json::json!({
            "vehicle_activities": [{
                "operator_ref": "GB:NOC:FOOB",
                "location": {"longitude": -1.0, "latitude": 52.0}
            }]
        });
        let events = parse(document.to_string().as_bytes(), now).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn bad_root_is_fatal() {
        assert!(matches!(
            parse(b"[1, 2, 3]", Utc::now()),
            Err(ImportError::MalformedInput(_))
        ));
    }
}

use std::collections::HashMap;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::availability::Availability;
use super::location::Location;
use super::DataSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathItemActivity {
    Pickup,
    Setdown,
    Pass,
}

/// One stop-to-stop segment of a journey.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JourneyPathItem {
    pub origin_stop_ref: String,
    pub destination_stop_ref: String,

    pub origin_arrival_time: NaiveTime,
    pub origin_departure_time: NaiveTime,
    pub destination_arrival_time: NaiveTime,

    #[serde(default)]
    pub destination_display: String,

    #[serde(default)]
    pub origin_activity: Vec<PathItemActivity>,
    #[serde(default)]
    pub destination_activity: Vec<PathItemActivity>,

    /// Geographic points between the two stops. May be empty, in which case
    /// the segment carries no geometric signal and vehicle projection is
    /// disabled for it.
    #[serde(default)]
    pub track: Vec<Location>,
}

/// One scheduled run of a service from origin to destination.
///
/// Path invariant: `path[i].destination_stop_ref == path[i+1].origin_stop_ref`
/// and times are non-decreasing along the path modulo midnight rollover.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Journey {
    pub primary_identifier: String,
    /// Source-specific codes used for realtime identification,
    /// e.g. `TicketMachineJourneyCode`, `BlockNumber`, `TrainUID`.
    #[serde(default)]
    pub other_identifiers: HashMap<String, String>,

    pub service_ref: String,
    pub operator_ref: String,

    #[serde(default)]
    pub direction: String,
    /// Nominal time-of-day the journey leaves its origin.
    pub departure_time: NaiveTime,
    #[serde(default)]
    pub destination_display: String,

    #[serde(default)]
    pub availability: Availability,

    pub path: Vec<JourneyPathItem>,

    #[serde(default)]
    pub creation_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modification_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data_source: Option<DataSource>,
}

impl Journey {
    /// Deterministic fingerprint of the journey's schedule-relevant fields.
    ///
    /// Two journeys with equal hash are treated as structurally identical
    /// when narrowing identification candidates. The field order is fixed:
    /// service, destination display, direction, departure time, then every
    /// availability rule (condition, match, match-secondary, exclude), then
    /// every path item's stop refs and times.
    pub fn functional_hash(&self) -> String {
        let mut hash = Sha256::new();

        hash.update(self.service_ref.as_bytes());
        hash.update(self.destination_display.as_bytes());
        hash.update(self.direction.as_bytes());
        hash.update(self.departure_time.format("%H:%M:%S").to_string().as_bytes());

        for rule in self.availability.all_rules() {
            hash.update(rule.rule_type.as_bytes());
            hash.update(rule.value.as_bytes());
            hash.update(rule.description.as_bytes());
        }

        for item in &self.path {
            hash.update(item.origin_stop_ref.as_bytes());
            hash.update(item.origin_arrival_time.format("%H:%M:%S").to_string().as_bytes());
            hash.update(
                item.origin_departure_time
                    .format("%H:%M:%S")
                    .to_string()
                    .as_bytes(),
            );
            hash.update(item.destination_stop_ref.as_bytes());
            hash.update(
                item.destination_arrival_time
                    .format("%H:%M:%S")
                    .to_string()
                    .as_bytes(),
            );
        }

        format!("{:x}", hash.finalize())
    }

    /// Drop journeys that are structurally identical to an earlier one,
    /// keeping first occurrences. Order-independent in the sense that the
    /// surviving set of hashes is the same whatever the input order.
    pub fn dedup_identical(journeys: Vec<Journey>) -> Vec<Journey> {
        let mut seen = std::collections::HashSet::new();
        journeys
            .into_iter()
            .filter(|j| seen.insert(j.functional_hash()))
            .collect()
    }
}

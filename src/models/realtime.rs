use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::location::Location;
use super::DataSource;

/// Identifier of an AVL-derived realtime journey: `{date}:{journeyRef}`.
pub fn realtime_journey_id(timeframe: &str, journey_ref: &str) -> String {
    format!("{timeframe}:{journey_ref}")
}

/// Identifier of a rail-derived realtime journey: `GB:DARWIN:{date}:{UID}`.
pub fn darwin_journey_id(ssd: &str, uid: &str) -> String {
    format!("GB:DARWIN:{ssd}:{uid}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RealtimeStopTimeType {
    HistoricalActual,
    EstimatedFuture,
    ScheduledFuture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reliability {
    /// Derived from vehicle positions projected onto the journey's track.
    LocationTracking,
    /// Supplied directly by an external realtime provider.
    ExternalProvided,
}

/// Live times for one stop of a tracked journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeJourneyStop {
    pub stop_ref: String,
    pub time_type: RealtimeStopTimeType,
    #[serde(default)]
    pub arrival_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub departure_time: Option<DateTime<Utc>>,
}

/// The live state of one scheduled journey on one date.
///
/// At most one of these exists per `(date, journeyRef)`; the store's upsert
/// enforces that. `modification_datetime` only ever advances; consumers
/// treat the document as stale once it is older than the active cutoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeJourney {
    pub primary_identifier: String,
    pub journey_ref: String,

    pub creation_datetime: DateTime<Utc>,
    pub modification_datetime: DateTime<Utc>,

    pub data_source: DataSource,
    pub reliability: Reliability,
    /// False for externally-provided journeys which carry no position data.
    pub actively_tracked: bool,

    #[serde(default)]
    pub vehicle_location: Option<Location>,
    #[serde(default)]
    pub vehicle_bearing: Option<f64>,

    #[serde(default)]
    pub departed_stop_ref: Option<String>,
    #[serde(default)]
    pub next_stop_ref: Option<String>,

    #[serde(default)]
    pub stops: HashMap<String, RealtimeJourneyStop>,

    /// Free-form notes from the provider, e.g. `LateReason`.
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl RealtimeJourney {
    pub fn is_active(&self, now: DateTime<Utc>, cutoff: Duration) -> bool {
        now - self.modification_datetime < cutoff
    }
}

/// A positional report already resolved to a scheduled journey, ready for
/// progression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleLocationEvent {
    pub journey_ref: String,
    /// Operating date, `YYYY-MM-DD`.
    pub timeframe: String,
    pub location: Location,
    #[serde(default)]
    pub bearing: Option<f64>,
    pub data_source: DataSource,
    pub observed_at: DateTime<Utc>,
}

/// A raw vehicle report from an AVL feed, carrying the partial identifying
/// fields the journey identifier resolves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleActivityEvent {
    #[serde(default)]
    pub operator_ref: Option<String>,
    #[serde(default)]
    pub published_line_name: Option<String>,
    #[serde(default)]
    pub service_name_ref: Option<String>,
    #[serde(default)]
    pub vehicle_journey_ref: Option<String>,
    #[serde(default)]
    pub block_ref: Option<String>,
    #[serde(default)]
    pub origin_ref: Option<String>,
    #[serde(default)]
    pub destination_ref: Option<String>,
    /// XSD datetime, e.g. `2024-06-10T08:15:00+01:00`.
    #[serde(default)]
    pub origin_aimed_departure_time: Option<String>,
    /// Operating date, `YYYY-MM-DD`.
    #[serde(default)]
    pub framed_vehicle_journey_date: Option<String>,

    pub location: Location,
    #[serde(default)]
    pub bearing: Option<f64>,
    /// XSD datetime of the position report.
    #[serde(default)]
    pub recorded_at: Option<String>,

    #[serde(default)]
    pub data_source: Option<DataSource>,
}

/// A per-stop update from a rail train-status message. Times are `HH:MM`
/// within the service start date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainStatusLocation {
    pub tiploc: String,
    #[serde(default)]
    pub estimated_arrival: Option<String>,
    #[serde(default)]
    pub estimated_departure: Option<String>,
}

/// A rail train-status message from an external realtime provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainStatusEvent {
    /// Service start date, `YYYY-MM-DD`.
    pub ssd: String,
    /// Schedule UID of the train.
    pub uid: String,
    #[serde(default)]
    pub locations: Vec<TrainStatusLocation>,
    #[serde(default)]
    pub late_reason: Option<String>,
    #[serde(default)]
    pub data_source: Option<DataSource>,
}

/// Everything the fusion workers consume off the event queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RealtimeEvent {
    VehicleActivity(VehicleActivityEvent),
    TrainStatus(TrainStatusEvent),
}

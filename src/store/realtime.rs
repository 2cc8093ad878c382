//! Realtime journey storage.
//!
//! One document per `(date, journeyRef)`, keyed by the composed primary
//! identifier. Writes always advance `modification_datetime`; the active
//! cutoff turns that into the liveness signal every schedule/realtime join
//! filters on.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use sqlx::Row;

use crate::models::{
    DataSource, Location, RealtimeJourney, RealtimeJourneyStop, Reliability,
};

use super::{Store, StoreError};

/// A full AVL-derived update: replaces the position fields and the whole
/// stop estimate map.
#[derive(Debug, Clone)]
pub struct RealtimeUpsert {
    pub primary_identifier: String,
    pub journey_ref: String,
    pub data_source: DataSource,
    pub vehicle_location: Option<Location>,
    pub vehicle_bearing: Option<f64>,
    pub departed_stop_ref: Option<String>,
    pub next_stop_ref: Option<String>,
    pub stops: HashMap<String, RealtimeJourneyStop>,
}

impl Store {
    pub async fn find_realtime_journey(
        &self,
        primary_identifier: &str,
    ) -> Result<Option<RealtimeJourney>, StoreError> {
        let row = sqlx::query("SELECT document FROM realtime_journeys WHERE primary_identifier = ?")
            .bind(primary_identifier)
            .fetch_optional(self.pool())
            .await?;
        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.get::<String, _>(0))?)),
            None => Ok(None),
        }
    }

    /// Fetch a realtime journey only if it has been modified within the
    /// active cutoff. The predicate is part of the query, like every join
    /// that combines schedule and realtime data.
    pub async fn find_active_realtime_journey(
        &self,
        primary_identifier: &str,
        now: DateTime<Utc>,
        active_cutoff: Duration,
    ) -> Result<Option<RealtimeJourney>, StoreError> {
        let cutoff_time = now - active_cutoff;
        let row = sqlx::query(
            "SELECT document FROM realtime_journeys \
             WHERE primary_identifier = ? AND modification_datetime > ?",
        )
        .bind(primary_identifier)
        .bind(cutoff_time)
        .fetch_optional(self.pool())
        .await?;
        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.get::<String, _>(0))?)),
            None => Ok(None),
        }
    }

    /// Upsert from a vehicle-position progression. Creation fields are only
    /// set on first write; position fields and the stop map are replaced
    /// wholesale on every update.
    pub async fn upsert_vehicle_journey(
        &self,
        update: RealtimeUpsert,
        now: DateTime<Utc>,
    ) -> Result<RealtimeJourney, StoreError> {
        let mut journey = match self.find_realtime_journey(&update.primary_identifier).await? {
            Some(existing) => existing,
            None => RealtimeJourney {
                primary_identifier: update.primary_identifier.clone(),
                journey_ref: update.journey_ref.clone(),
                creation_datetime: now,
                modification_datetime: now,
                data_source: update.data_source.clone(),
                reliability: Reliability::LocationTracking,
                actively_tracked: true,
                vehicle_location: None,
                vehicle_bearing: None,
                departed_stop_ref: None,
                next_stop_ref: None,
                stops: HashMap::new(),
                annotations: HashMap::new(),
            },
        };

        journey.modification_datetime = now;
        journey.data_source = update.data_source;
        journey.vehicle_location = update.vehicle_location;
        journey.vehicle_bearing = update.vehicle_bearing;
        journey.departed_stop_ref = update.departed_stop_ref;
        journey.next_stop_ref = update.next_stop_ref;
        journey.stops = update.stops;

        self.write_realtime_journey(&journey).await?;
        Ok(journey)
    }

    /// Merge an external-provider update. Per-stop fields update
    /// independently: a message carrying only an arrival time leaves the
    /// stored departure time alone, and vice versa.
    pub async fn merge_external_journey(
        &self,
        primary_identifier: &str,
        journey_ref: &str,
        stop_updates: Vec<RealtimeJourneyStop>,
        late_reason: Option<String>,
        data_source: DataSource,
        now: DateTime<Utc>,
    ) -> Result<RealtimeJourney, StoreError> {
        let mut journey = match self.find_realtime_journey(primary_identifier).await? {
            Some(mut existing) => {
                // Only the batch tag moves on subsequent updates.
                existing.data_source.timestamp = data_source.timestamp.clone();
                existing
            }
            None => RealtimeJourney {
                primary_identifier: primary_identifier.to_string(),
                journey_ref: journey_ref.to_string(),
                creation_datetime: now,
                modification_datetime: now,
                data_source,
                reliability: Reliability::ExternalProvided,
                actively_tracked: false,
                vehicle_location: None,
                vehicle_bearing: None,
                departed_stop_ref: None,
                next_stop_ref: None,
                stops: HashMap::new(),
                annotations: HashMap::new(),
            },
        };

        journey.modification_datetime = now;

        for update in stop_updates {
            let entry = journey
                .stops
                .entry(update.stop_ref.clone())
                .or_insert_with(|| RealtimeJourneyStop {
                    stop_ref: update.stop_ref.clone(),
                    time_type: update.time_type,
                    arrival_time: None,
                    departure_time: None,
                });
            if update.arrival_time.is_some() {
                entry.arrival_time = update.arrival_time;
            }
            if update.departure_time.is_some() {
                entry.departure_time = update.departure_time;
            }
        }

        if let Some(reason) = late_reason {
            journey.annotations.insert("LateReason".to_string(), reason);
        }

        self.write_realtime_journey(&journey).await?;
        Ok(journey)
    }

    pub async fn realtime_journey_count(&self) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM realtime_journeys")
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }

    async fn write_realtime_journey(&self, journey: &RealtimeJourney) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO realtime_journeys
                (primary_identifier, journey_ref, creation_datetime, modification_datetime,
                 reliability, actively_tracked, document)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&journey.primary_identifier)
        .bind(&journey.journey_ref)
        .bind(journey.creation_datetime)
        .bind(journey.modification_datetime)
        .bind(match journey.reliability {
            Reliability::LocationTracking => "LocationTracking",
            Reliability::ExternalProvided => "ExternalProvided",
        })
        .bind(journey.actively_tracked)
        .bind(serde_json::to_string(journey)?)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

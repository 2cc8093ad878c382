//! Journey storage and the candidate queries used by identification and the
//! departure board.
//!
//! Path items live in the `journey_path` side table; the projection variants
//! below control which columns a query ships, so the heavy fields (track
//! geometry, activity sets) never ride along on lookups that don't need them.

use std::collections::HashMap;

use chrono::{DateTime, NaiveTime, Utc};
use sqlx::Row;

use crate::models::{Journey, JourneyPathItem};

use super::{placeholders, should_replace, Store, StoreError, UpsertOutcome};

/// How much of a journey a query materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JourneyProjection {
    /// Candidate matching: no destination display, no other identifiers,
    /// path without track or activities.
    Identification,
    /// Departure boards: destination display included, path still light.
    DepartureBoard,
    /// Everything, including track geometry. Used by progression.
    Full,
}

impl JourneyProjection {
    fn journey_columns(&self) -> &'static str {
        match self {
            JourneyProjection::Identification => {
                "primary_identifier, service_ref, operator_ref, direction, departure_time, \
                 '' AS destination_display, '{}' AS other_identifiers, availability"
            }
            JourneyProjection::DepartureBoard => {
                "primary_identifier, service_ref, operator_ref, direction, departure_time, \
                 destination_display, '{}' AS other_identifiers, availability"
            }
            JourneyProjection::Full => {
                "primary_identifier, service_ref, operator_ref, direction, departure_time, \
                 destination_display, other_identifiers, availability"
            }
        }
    }

    fn path_columns(&self) -> &'static str {
        match self {
            JourneyProjection::Full => {
                "journey_ref, origin_stop_ref, destination_stop_ref, origin_arrival_time, \
                 origin_departure_time, destination_arrival_time, destination_display, \
                 origin_activity, destination_activity, track"
            }
            _ => {
                "journey_ref, origin_stop_ref, destination_stop_ref, origin_arrival_time, \
                 origin_departure_time, destination_arrival_time, destination_display, \
                 '[]' AS origin_activity, '[]' AS destination_activity, '[]' AS track"
            }
        }
    }
}

fn parse_time(value: &str) -> Result<NaiveTime, StoreError> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .map_err(|e| StoreError::MalformedValue(format!("time {value:?}: {e}")))
}

fn journey_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Journey, StoreError> {
    Ok(Journey {
        primary_identifier: row.get("primary_identifier"),
        service_ref: row.get("service_ref"),
        operator_ref: row.get("operator_ref"),
        direction: row.get("direction"),
        departure_time: parse_time(&row.get::<String, _>("departure_time"))?,
        destination_display: row.get("destination_display"),
        other_identifiers: serde_json::from_str(&row.get::<String, _>("other_identifiers"))?,
        availability: serde_json::from_str(&row.get::<String, _>("availability"))?,
        path: Vec::new(),
        creation_datetime: None,
        modification_datetime: None,
        data_source: None,
    })
}

fn path_item_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<JourneyPathItem, StoreError> {
    Ok(JourneyPathItem {
        origin_stop_ref: row.get("origin_stop_ref"),
        destination_stop_ref: row.get("destination_stop_ref"),
        origin_arrival_time: parse_time(&row.get::<String, _>("origin_arrival_time"))?,
        origin_departure_time: parse_time(&row.get::<String, _>("origin_departure_time"))?,
        destination_arrival_time: parse_time(&row.get::<String, _>("destination_arrival_time"))?,
        destination_display: row.get("destination_display"),
        origin_activity: serde_json::from_str(&row.get::<String, _>("origin_activity"))?,
        destination_activity: serde_json::from_str(&row.get::<String, _>("destination_activity"))?,
        track: serde_json::from_str(&row.get::<String, _>("track"))?,
    })
}

impl Store {
    /// Attach path items to a set of journeys in one grouped fetch.
    async fn attach_paths(
        &self,
        journeys: &mut [Journey],
        projection: JourneyProjection,
    ) -> Result<(), StoreError> {
        if journeys.is_empty() {
            return Ok(());
        }
        let refs: Vec<&str> = journeys.iter().map(|j| j.primary_identifier.as_str()).collect();
        let sql = format!(
            "SELECT {} FROM journey_path WHERE journey_ref IN ({}) ORDER BY journey_ref, idx",
            projection.path_columns(),
            placeholders(refs.len())
        );
        let mut query = sqlx::query(&sql);
        for journey_ref in &refs {
            query = query.bind(journey_ref);
        }
        let rows = query.fetch_all(self.pool()).await?;

        let mut by_journey: HashMap<String, Vec<JourneyPathItem>> = HashMap::new();
        for row in &rows {
            let journey_ref: String = row.get("journey_ref");
            by_journey
                .entry(journey_ref)
                .or_default()
                .push(path_item_from_row(row)?);
        }
        for journey in journeys.iter_mut() {
            journey.path = by_journey
                .remove(&journey.primary_identifier)
                .unwrap_or_default();
        }
        Ok(())
    }

    pub async fn find_journey(
        &self,
        primary_identifier: &str,
    ) -> Result<Option<Journey>, StoreError> {
        let projection = JourneyProjection::Full;
        let sql = format!(
            "SELECT {} FROM journeys WHERE primary_identifier = ?",
            projection.journey_columns()
        );
        let row = sqlx::query(&sql)
            .bind(primary_identifier)
            .fetch_optional(self.pool())
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut journeys = vec![journey_from_row(&row)?];
        self.attach_paths(&mut journeys, projection).await?;
        Ok(journeys.pop())
    }

    /// Candidates keyed by a source identification code, e.g.
    /// `("TicketMachineJourneyCode", "VJ-001")` or `("BlockNumber", "B7")`,
    /// scoped to a set of services.
    pub async fn journey_candidates_by_code(
        &self,
        service_refs: &[String],
        code_key: &str,
        code_value: &str,
    ) -> Result<Vec<Journey>, StoreError> {
        if service_refs.is_empty() {
            return Ok(Vec::new());
        }
        let projection = JourneyProjection::Identification;
        let sql = format!(
            "SELECT {} FROM journeys WHERE service_ref IN ({}) \
             AND json_extract(other_identifiers, ?) = ?",
            projection.journey_columns(),
            placeholders(service_refs.len())
        );
        let mut query = sqlx::query(&sql);
        for service_ref in service_refs {
            query = query.bind(service_ref);
        }
        query = query.bind(format!("$.{code_key}")).bind(code_value);

        let rows = query.fetch_all(self.pool()).await?;
        let mut journeys = rows
            .iter()
            .map(journey_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        self.attach_paths(&mut journeys, projection).await?;
        Ok(journeys)
    }

    /// Candidates for one service whose first path item departs `origin_ref`
    /// or whose last path item arrives at `destination_ref`.
    pub async fn journey_candidates_by_terminus(
        &self,
        service_ref: &str,
        origin_ref: &str,
        destination_ref: &str,
    ) -> Result<Vec<Journey>, StoreError> {
        let projection = JourneyProjection::Identification;
        let sql = format!(
            r#"
            SELECT {} FROM journeys j
            WHERE j.service_ref = ?
              AND (EXISTS (SELECT 1 FROM journey_path p
                           WHERE p.journey_ref = j.primary_identifier
                             AND p.idx = 0 AND p.origin_stop_ref = ?)
                OR EXISTS (SELECT 1 FROM journey_path p
                           WHERE p.journey_ref = j.primary_identifier
                             AND p.idx = (SELECT MAX(p2.idx) FROM journey_path p2
                                          WHERE p2.journey_ref = j.primary_identifier)
                             AND p.destination_stop_ref = ?))
            "#,
            projection.journey_columns()
        );
        let rows = sqlx::query(&sql)
            .bind(service_ref)
            .bind(origin_ref)
            .bind(destination_ref)
            .fetch_all(self.pool())
            .await?;
        let mut journeys = rows
            .iter()
            .map(journey_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        self.attach_paths(&mut journeys, projection).await?;
        Ok(journeys)
    }

    /// Candidates matched by any stored identification code,
    /// e.g. `("TrainUID", "C12345")` for rail status updates.
    pub async fn find_journeys_by_other_identifier(
        &self,
        code_key: &str,
        code_value: &str,
    ) -> Result<Vec<Journey>, StoreError> {
        let projection = JourneyProjection::Identification;
        let sql = format!(
            "SELECT {} FROM journeys WHERE json_extract(other_identifiers, ?) = ?",
            projection.journey_columns()
        );
        let rows = sqlx::query(&sql)
            .bind(format!("$.{code_key}"))
            .bind(code_value)
            .fetch_all(self.pool())
            .await?;
        let mut journeys = rows
            .iter()
            .map(journey_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        self.attach_paths(&mut journeys, projection).await?;
        Ok(journeys)
    }

    /// Departure-board candidates: every journey with a path item departing
    /// the stop. Single indexed query, light projection.
    pub async fn journeys_calling_at(&self, stop_ref: &str) -> Result<Vec<Journey>, StoreError> {
        let projection = JourneyProjection::DepartureBoard;
        let sql = format!(
            r#"
            SELECT {} FROM journeys j
            WHERE EXISTS (SELECT 1 FROM journey_path p
                          WHERE p.journey_ref = j.primary_identifier
                            AND p.origin_stop_ref = ?)
            "#,
            projection.journey_columns()
        );
        let rows = sqlx::query(&sql)
            .bind(stop_ref)
            .fetch_all(self.pool())
            .await?;
        let mut journeys = rows
            .iter()
            .map(journey_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        self.attach_paths(&mut journeys, projection).await?;
        Ok(journeys)
    }

    pub async fn upsert_journey(&self, journey: &Journey) -> Result<UpsertOutcome, StoreError> {
        let existing = self
            .stored_modification("journeys", &journey.primary_identifier)
            .await?;
        let outcome = match existing {
            None => UpsertOutcome::Inserted,
            Some(existing_ts) if should_replace(existing_ts, journey.modification_datetime) => {
                UpsertOutcome::Updated
            }
            Some(_) => {
                if let Some(ds) = &journey.data_source {
                    self.refresh_datasource_timestamp(
                        "journeys",
                        false,
                        &journey.primary_identifier,
                        ds,
                    )
                    .await?;
                }
                return Ok(UpsertOutcome::Skipped);
            }
        };

        let ds = journey.data_source.clone().unwrap_or_default();
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO journeys
                (primary_identifier, service_ref, operator_ref, direction, departure_time,
                 destination_display, other_identifiers, availability,
                 datasource_format, datasource_provider, datasource_dataset, datasource_timestamp,
                 creation_datetime, modification_datetime)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&journey.primary_identifier)
        .bind(&journey.service_ref)
        .bind(&journey.operator_ref)
        .bind(&journey.direction)
        .bind(journey.departure_time.format("%H:%M:%S").to_string())
        .bind(&journey.destination_display)
        .bind(serde_json::to_string(&journey.other_identifiers)?)
        .bind(serde_json::to_string(&journey.availability)?)
        .bind(&ds.original_format)
        .bind(&ds.provider)
        .bind(&ds.dataset_id)
        .bind(&ds.timestamp)
        .bind(journey.creation_datetime)
        .bind(journey.modification_datetime)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM journey_path WHERE journey_ref = ?")
            .bind(&journey.primary_identifier)
            .execute(&mut *tx)
            .await?;

        for (idx, item) in journey.path.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO journey_path
                    (journey_ref, idx, origin_stop_ref, destination_stop_ref,
                     origin_arrival_time, origin_departure_time, destination_arrival_time,
                     destination_display, origin_activity, destination_activity, track)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&journey.primary_identifier)
            .bind(idx as i64)
            .bind(&item.origin_stop_ref)
            .bind(&item.destination_stop_ref)
            .bind(item.origin_arrival_time.format("%H:%M:%S").to_string())
            .bind(item.origin_departure_time.format("%H:%M:%S").to_string())
            .bind(item.destination_arrival_time.format("%H:%M:%S").to_string())
            .bind(&item.destination_display)
            .bind(serde_json::to_string(&item.origin_activity)?)
            .bind(serde_json::to_string(&item.destination_activity)?)
            .bind(serde_json::to_string(&item.track)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Stored modification timestamp of a journey, for monotonicity checks.
    pub async fn journey_modification_datetime(
        &self,
        primary_identifier: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .stored_modification("journeys", primary_identifier)
            .await?
            .flatten())
    }
}

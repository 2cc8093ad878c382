//! Document store access on top of SQLite.
//!
//! Each collection is a table holding queried fields as columns and the full
//! entity as a JSON document. Reads are `Option`-returning façades; absence
//! is not an error at this layer. Reference-data writes follow the
//! timestamp-compared upsert rule so re-imports are idempotent.

mod journeys;
mod realtime;

pub use journeys::JourneyProjection;
pub use realtime::RealtimeUpsert;

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::info;

use crate::models::{DataSource, Operator, OperatorGroup, Service, Stop, StopGroup};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Document decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Malformed stored value: {0}")]
    MalformedValue(String),
}

/// The collections of the canonical store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Stops,
    StopGroups,
    Operators,
    OperatorGroups,
    Services,
    Journeys,
}

impl Collection {
    pub fn table_name(&self) -> &'static str {
        match self {
            Collection::Stops => "stops",
            Collection::StopGroups => "stop_groups",
            Collection::Operators => "operators",
            Collection::OperatorGroups => "operator_groups",
            Collection::Services => "services",
            Collection::Journeys => "journeys",
        }
    }
}

/// Outcome of a timestamped upsert, for import counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Skipped,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// Replace when the stored record is older than the incoming one, or when
/// the stored timestamp is the zero value (never set).
fn should_replace(existing: Option<DateTime<Utc>>, incoming: Option<DateTime<Utc>>) -> bool {
    match (existing, incoming) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(existing), Some(incoming)) => existing < incoming,
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl Store {
    /// Open (creating if needed) the database file and run migrations.
    pub async fn connect(database_path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePool::connect(&url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(path = database_path, "Connected to document store");
        Ok(Self { pool })
    }

    /// An isolated in-memory store. Pinned to a single connection because
    /// every new `:memory:` connection would otherwise be a fresh database.
    pub async fn connect_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // --- generic helpers ---

    async fn stored_modification(
        &self,
        table: &str,
        primary_identifier: &str,
    ) -> Result<Option<Option<DateTime<Utc>>>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT modification_datetime FROM {table} WHERE primary_identifier = ?"
        ))
        .bind(primary_identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<Option<DateTime<Utc>>, _>(0)))
    }

    async fn find_document<T: DeserializeOwned>(
        &self,
        table: &str,
        primary_identifier: &str,
    ) -> Result<Option<T>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT document FROM {table} WHERE primary_identifier = ?"
        ))
        .bind(primary_identifier)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.get::<String, _>(0))?)),
            None => Ok(None),
        }
    }

    fn encode_document<T: Serialize>(entity: &T) -> Result<String, StoreError> {
        Ok(serde_json::to_string(entity)?)
    }

    /// A record skipped by the timestamp rule still belongs to the new batch:
    /// its batch tag is moved forward so the post-import cleanup does not
    /// sweep it away with genuinely stale records. Only applies when the
    /// record is owned by the same `(format, provider, dataset)` triple.
    pub(crate) async fn refresh_datasource_timestamp(
        &self,
        table: &str,
        has_document: bool,
        primary_identifier: &str,
        datasource: &DataSource,
    ) -> Result<(), StoreError> {
        let sql = if has_document {
            format!(
                "UPDATE {table} SET datasource_timestamp = ?, \
                 document = json_set(document, '$.data_source.timestamp', ?) \
                 WHERE primary_identifier = ? AND datasource_format = ? \
                   AND datasource_provider = ? AND datasource_dataset = ?"
            )
        } else {
            format!(
                "UPDATE {table} SET datasource_timestamp = ? \
                 WHERE primary_identifier = ? AND datasource_format = ? \
                   AND datasource_provider = ? AND datasource_dataset = ?"
            )
        };
        let mut query = sqlx::query(&sql).bind(&datasource.timestamp);
        if has_document {
            query = query.bind(&datasource.timestamp);
        }
        query
            .bind(primary_identifier)
            .bind(&datasource.original_format)
            .bind(&datasource.provider)
            .bind(&datasource.dataset_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- stops ---

    pub async fn find_stop(&self, primary_identifier: &str) -> Result<Option<Stop>, StoreError> {
        self.find_document("stops", primary_identifier).await
    }

    /// Resolve a stop by a named cross-reference, e.g. `("Tiploc", "EUSTON")`.
    pub async fn find_stop_by_other_identifier(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<Stop>, StoreError> {
        let row = sqlx::query(
            "SELECT document FROM stops WHERE json_extract(other_identifiers, ?) = ? LIMIT 1",
        )
        .bind(format!("$.{key}"))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.get::<String, _>(0))?)),
            None => Ok(None),
        }
    }

    pub async fn upsert_stop(&self, stop: &Stop) -> Result<UpsertOutcome, StoreError> {
        let existing = self.stored_modification("stops", &stop.primary_identifier).await?;
        let outcome = match existing {
            None => UpsertOutcome::Inserted,
            Some(existing_ts) if should_replace(existing_ts, stop.modification_datetime) => {
                UpsertOutcome::Updated
            }
            Some(_) => {
                if let Some(ds) = &stop.data_source {
                    self.refresh_datasource_timestamp("stops", true, &stop.primary_identifier, ds)
                        .await?;
                }
                return Ok(UpsertOutcome::Skipped);
            }
        };

        let ds = stop.data_source.clone().unwrap_or_default();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO stops
                (primary_identifier, primary_name, active, longitude, latitude,
                 other_identifiers, document,
                 datasource_format, datasource_provider, datasource_dataset, datasource_timestamp,
                 modification_datetime)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&stop.primary_identifier)
        .bind(&stop.primary_name)
        .bind(stop.active)
        .bind(stop.location.map(|l| l.longitude))
        .bind(stop.location.map(|l| l.latitude))
        .bind(serde_json::to_string(&stop.other_identifiers)?)
        .bind(Self::encode_document(stop)?)
        .bind(&ds.original_format)
        .bind(&ds.provider)
        .bind(&ds.dataset_id)
        .bind(&ds.timestamp)
        .bind(stop.modification_datetime)
        .execute(&self.pool)
        .await?;
        Ok(outcome)
    }

    // --- stop groups ---

    pub async fn find_stop_group(
        &self,
        primary_identifier: &str,
    ) -> Result<Option<StopGroup>, StoreError> {
        self.find_document("stop_groups", primary_identifier).await
    }

    pub async fn upsert_stop_group(&self, group: &StopGroup) -> Result<UpsertOutcome, StoreError> {
        let existing = self
            .stored_modification("stop_groups", &group.primary_identifier)
            .await?;
        let outcome = match existing {
            None => UpsertOutcome::Inserted,
            Some(existing_ts) if should_replace(existing_ts, group.modification_datetime) => {
                UpsertOutcome::Updated
            }
            Some(_) => {
                if let Some(ds) = &group.data_source {
                    self.refresh_datasource_timestamp(
                        "stop_groups",
                        true,
                        &group.primary_identifier,
                        ds,
                    )
                    .await?;
                }
                return Ok(UpsertOutcome::Skipped);
            }
        };

        let ds = group.data_source.clone().unwrap_or_default();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO stop_groups
                (primary_identifier, document,
                 datasource_format, datasource_provider, datasource_dataset, datasource_timestamp,
                 modification_datetime)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&group.primary_identifier)
        .bind(Self::encode_document(group)?)
        .bind(&ds.original_format)
        .bind(&ds.provider)
        .bind(&ds.dataset_id)
        .bind(&ds.timestamp)
        .bind(group.modification_datetime)
        .execute(&self.pool)
        .await?;
        Ok(outcome)
    }

    // --- operators ---

    pub async fn find_operator(
        &self,
        primary_identifier: &str,
    ) -> Result<Option<Operator>, StoreError> {
        self.find_document("operators", primary_identifier).await
    }

    /// Find an operator whose primary identifier or any alternate identifier
    /// equals `identifier`.
    pub async fn find_operator_by_any_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<Operator>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT document FROM operators
            WHERE primary_identifier = ?
               OR EXISTS (SELECT 1 FROM json_each(operators.other_identifiers)
                          WHERE json_each.value = ?)
            LIMIT 1
            "#,
        )
        .bind(identifier)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.get::<String, _>(0))?)),
            None => Ok(None),
        }
    }

    pub async fn upsert_operator(&self, operator: &Operator) -> Result<UpsertOutcome, StoreError> {
        let existing = self
            .stored_modification("operators", &operator.primary_identifier)
            .await?;
        let outcome = match existing {
            None => UpsertOutcome::Inserted,
            Some(existing_ts) if should_replace(existing_ts, operator.modification_datetime) => {
                UpsertOutcome::Updated
            }
            Some(_) => {
                if let Some(ds) = &operator.data_source {
                    self.refresh_datasource_timestamp(
                        "operators",
                        true,
                        &operator.primary_identifier,
                        ds,
                    )
                    .await?;
                }
                return Ok(UpsertOutcome::Skipped);
            }
        };

        let ds = operator.data_source.clone().unwrap_or_default();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO operators
                (primary_identifier, primary_name, other_identifiers, document,
                 datasource_format, datasource_provider, datasource_dataset, datasource_timestamp,
                 modification_datetime)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&operator.primary_identifier)
        .bind(&operator.primary_name)
        .bind(serde_json::to_string(&operator.other_identifiers)?)
        .bind(Self::encode_document(operator)?)
        .bind(&ds.original_format)
        .bind(&ds.provider)
        .bind(&ds.dataset_id)
        .bind(&ds.timestamp)
        .bind(operator.modification_datetime)
        .execute(&self.pool)
        .await?;
        Ok(outcome)
    }

    // --- operator groups ---

    pub async fn find_operator_group(
        &self,
        primary_identifier: &str,
    ) -> Result<Option<OperatorGroup>, StoreError> {
        self.find_document("operator_groups", primary_identifier).await
    }

    pub async fn upsert_operator_group(
        &self,
        group: &OperatorGroup,
    ) -> Result<UpsertOutcome, StoreError> {
        let existing = self
            .stored_modification("operator_groups", &group.primary_identifier)
            .await?;
        let outcome = match existing {
            None => UpsertOutcome::Inserted,
            Some(existing_ts) if should_replace(existing_ts, group.modification_datetime) => {
                UpsertOutcome::Updated
            }
            Some(_) => {
                if let Some(ds) = &group.data_source {
                    self.refresh_datasource_timestamp(
                        "operator_groups",
                        true,
                        &group.primary_identifier,
                        ds,
                    )
                    .await?;
                }
                return Ok(UpsertOutcome::Skipped);
            }
        };

        let ds = group.data_source.clone().unwrap_or_default();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO operator_groups
                (primary_identifier, document,
                 datasource_format, datasource_provider, datasource_dataset, datasource_timestamp,
                 modification_datetime)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&group.primary_identifier)
        .bind(Self::encode_document(group)?)
        .bind(&ds.original_format)
        .bind(&ds.provider)
        .bind(&ds.dataset_id)
        .bind(&ds.timestamp)
        .bind(group.modification_datetime)
        .execute(&self.pool)
        .await?;
        Ok(outcome)
    }

    // --- services ---

    pub async fn find_service(
        &self,
        primary_identifier: &str,
    ) -> Result<Option<Service>, StoreError> {
        self.find_document("services", primary_identifier).await
    }

    pub async fn find_services_by_name_and_operators(
        &self,
        service_name: &str,
        operator_refs: &[String],
    ) -> Result<Vec<Service>, StoreError> {
        if operator_refs.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT document FROM services WHERE service_name = ? AND operator_ref IN ({})",
            placeholders(operator_refs.len())
        );
        let mut query = sqlx::query(&sql).bind(service_name);
        for operator_ref in operator_refs {
            query = query.bind(operator_ref);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| Ok(serde_json::from_str(&row.get::<String, _>(0))?))
            .collect()
    }

    /// Services with at least one journey calling at the stop.
    pub async fn find_services_for_stop(&self, stop_ref: &str) -> Result<Vec<Service>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT s.document FROM services s
            JOIN journeys j ON j.service_ref = s.primary_identifier
            WHERE EXISTS (SELECT 1 FROM journey_path p
                          WHERE p.journey_ref = j.primary_identifier
                            AND p.origin_stop_ref = ?)
            "#,
        )
        .bind(stop_ref)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| Ok(serde_json::from_str(&row.get::<String, _>(0))?))
            .collect()
    }

    pub async fn upsert_service(&self, service: &Service) -> Result<UpsertOutcome, StoreError> {
        let existing = self
            .stored_modification("services", &service.primary_identifier)
            .await?;
        let outcome = match existing {
            None => UpsertOutcome::Inserted,
            Some(existing_ts) if should_replace(existing_ts, service.modification_datetime) => {
                UpsertOutcome::Updated
            }
            Some(_) => {
                if let Some(ds) = &service.data_source {
                    self.refresh_datasource_timestamp(
                        "services",
                        true,
                        &service.primary_identifier,
                        ds,
                    )
                    .await?;
                }
                return Ok(UpsertOutcome::Skipped);
            }
        };

        let ds = service.data_source.clone().unwrap_or_default();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO services
                (primary_identifier, service_name, operator_ref, document,
                 datasource_format, datasource_provider, datasource_dataset, datasource_timestamp,
                 modification_datetime)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&service.primary_identifier)
        .bind(&service.service_name)
        .bind(&service.operator_ref)
        .bind(Self::encode_document(service)?)
        .bind(&ds.original_format)
        .bind(&ds.provider)
        .bind(&ds.dataset_id)
        .bind(&ds.timestamp)
        .bind(service.modification_datetime)
        .execute(&self.pool)
        .await?;
        Ok(outcome)
    }

    // --- maintenance ---

    /// Delete every record in the collection whose datasource matches on
    /// `(original_format, provider, dataset_id)` but came from a different
    /// ingestion batch. Runs only after an import fully succeeds.
    pub async fn cleanup_stale(
        &self,
        collection: Collection,
        datasource: &DataSource,
    ) -> Result<u64, StoreError> {
        if collection == Collection::Journeys {
            sqlx::query(
                r#"
                DELETE FROM journey_path WHERE journey_ref IN (
                    SELECT primary_identifier FROM journeys
                    WHERE datasource_format = ? AND datasource_provider = ?
                      AND datasource_dataset = ? AND datasource_timestamp != ?)
                "#,
            )
            .bind(&datasource.original_format)
            .bind(&datasource.provider)
            .bind(&datasource.dataset_id)
            .bind(&datasource.timestamp)
            .execute(&self.pool)
            .await?;
        }

        let result = sqlx::query(&format!(
            r#"
            DELETE FROM {}
            WHERE datasource_format = ? AND datasource_provider = ?
              AND datasource_dataset = ? AND datasource_timestamp != ?
            "#,
            collection.table_name()
        ))
        .bind(&datasource.original_format)
        .bind(&datasource.provider)
        .bind(&datasource.dataset_id)
        .bind(&datasource.timestamp)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(
                collection = collection.table_name(),
                deleted = result.rows_affected(),
                "Cleaned up stale records"
            );
        }
        Ok(result.rows_affected())
    }

    pub async fn count(&self, collection: Collection) -> Result<i64, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) FROM {}",
            collection.table_name()
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Location;
    use chrono::Duration;
    use std::collections::HashMap;

    fn test_datasource(timestamp: &str) -> DataSource {
        DataSource {
            original_format: "ctdf-json".into(),
            provider: "Test Provider".into(),
            dataset_id: "test-dataset".into(),
            timestamp: timestamp.into(),
        }
    }

    fn test_stop(id: &str, modified: DateTime<Utc>, timestamp: &str) -> Stop {
        Stop {
            primary_identifier: id.into(),
            primary_name: "Test Stop".into(),
            active: true,
            location: Some(Location::new(-1.0, 52.0)),
            other_identifiers: HashMap::from([("Tiploc".to_string(), "TSTSTOP".to_string())]),
            modification_datetime: Some(modified),
            data_source: Some(test_datasource(timestamp)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_stop_insert_then_skip_then_update() {
        let store = Store::connect_memory().await.unwrap();
        let t0 = Utc::now();

        let stop = test_stop("GB:ATCO:1000", t0, "100");
        assert_eq!(store.upsert_stop(&stop).await.unwrap(), UpsertOutcome::Inserted);

        // Same modification time: skipped.
        assert_eq!(store.upsert_stop(&stop).await.unwrap(), UpsertOutcome::Skipped);

        // Older: skipped.
        let older = test_stop("GB:ATCO:1000", t0 - Duration::hours(1), "100");
        assert_eq!(store.upsert_stop(&older).await.unwrap(), UpsertOutcome::Skipped);

        // Newer: updated.
        let mut newer = test_stop("GB:ATCO:1000", t0 + Duration::hours(1), "101");
        newer.primary_name = "Renamed Stop".into();
        assert_eq!(store.upsert_stop(&newer).await.unwrap(), UpsertOutcome::Updated);

        let fetched = store.find_stop("GB:ATCO:1000").await.unwrap().unwrap();
        assert_eq!(fetched.primary_name, "Renamed Stop");
    }

    #[tokio::test]
    async fn upsert_replaces_when_stored_timestamp_is_zero() {
        let store = Store::connect_memory().await.unwrap();

        let mut no_timestamp = test_stop("GB:ATCO:2000", Utc::now(), "100");
        no_timestamp.modification_datetime = None;
        store.upsert_stop(&no_timestamp).await.unwrap();

        let replacement = test_stop("GB:ATCO:2000", Utc::now(), "101");
        assert_eq!(
            store.upsert_stop(&replacement).await.unwrap(),
            UpsertOutcome::Updated
        );
    }

    #[tokio::test]
    async fn find_stop_by_tiploc() {
        let store = Store::connect_memory().await.unwrap();
        let stop = test_stop("GB:ATCO:3000", Utc::now(), "100");
        store.upsert_stop(&stop).await.unwrap();

        let found = store
            .find_stop_by_other_identifier("Tiploc", "TSTSTOP")
            .await
            .unwrap();
        assert_eq!(found.unwrap().primary_identifier, "GB:ATCO:3000");

        let missing = store
            .find_stop_by_other_identifier("Tiploc", "NOWHERE")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn operator_lookup_by_alternate_identifier() {
        let store = Store::connect_memory().await.unwrap();
        let operator = Operator {
            primary_identifier: "GB:NOC:FOOB".into(),
            other_identifiers: vec!["GB:NOC:FB".into(), "FOOB".into()],
            primary_name: "Foo Buses".into(),
            modification_datetime: Some(Utc::now()),
            data_source: Some(test_datasource("100")),
            ..Default::default()
        };
        store.upsert_operator(&operator).await.unwrap();

        for id in ["GB:NOC:FOOB", "GB:NOC:FB", "FOOB"] {
            let found = store.find_operator_by_any_identifier(id).await.unwrap();
            assert_eq!(
                found.map(|o| o.primary_identifier),
                Some("GB:NOC:FOOB".to_string()),
                "lookup by {id}"
            );
        }

        assert!(store
            .find_operator_by_any_identifier("GB:NOC:NONE")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn services_by_name_scoped_to_operator_pool() {
        let store = Store::connect_memory().await.unwrap();
        for (id, name, operator) in [
            ("GB:SERVICE:FOOB:42", "42", "GB:NOC:FOOB"),
            ("GB:SERVICE:BARB:42", "42", "GB:NOC:BARB"),
            ("GB:SERVICE:FOOB:7", "7", "GB:NOC:FOOB"),
        ] {
            let service = Service {
                primary_identifier: id.into(),
                service_name: name.into(),
                operator_ref: operator.into(),
                modification_datetime: Some(Utc::now()),
                data_source: Some(test_datasource("100")),
                ..Default::default()
            };
            store.upsert_service(&service).await.unwrap();
        }

        let services = store
            .find_services_by_name_and_operators("42", &["GB:NOC:FOOB".to_string()])
            .await
            .unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].primary_identifier, "GB:SERVICE:FOOB:42");

        let none = store
            .find_services_by_name_and_operators("42", &[])
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn cleanup_stale_removes_only_old_batches() {
        let store = Store::connect_memory().await.unwrap();

        let old = test_stop("GB:ATCO:4000", Utc::now(), "100");
        store.upsert_stop(&old).await.unwrap();
        let new = test_stop("GB:ATCO:5000", Utc::now(), "200");
        store.upsert_stop(&new).await.unwrap();

        // An unrelated provider must be untouched.
        let mut unrelated = test_stop("GB:ATCO:6000", Utc::now(), "100");
        unrelated.data_source = Some(DataSource {
            provider: "Other Provider".into(),
            ..test_datasource("100")
        });
        store.upsert_stop(&unrelated).await.unwrap();

        let deleted = store
            .cleanup_stale(Collection::Stops, &test_datasource("200"))
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        assert!(store.find_stop("GB:ATCO:4000").await.unwrap().is_none());
        assert!(store.find_stop("GB:ATCO:5000").await.unwrap().is_some());
        assert!(store.find_stop("GB:ATCO:6000").await.unwrap().is_some());
    }
}

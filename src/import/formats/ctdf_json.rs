//! The canonical interchange adapter: a JSON document carrying arrays of
//! canonical entities, as produced by the upstream conversion jobs.
//!
//! Stop groups and stops are sharded across parallel batch workers; the
//! completion of every batch is the only ordering point before the station
//! assembly pass runs. Station stops get their platforms and entrances
//! folded in from members of their stop groups; that relationship is fixed
//! here and never revisited at query time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread::available_parallelism;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::models::stop::{StopEntrance, StopPlatform};
use crate::models::{DataSource, Journey, Operator, OperatorGroup, Service, Stop, StopGroup};
use crate::store::{Store, UpsertOutcome};

use super::super::{ImportError, SupportedObjects};
use super::ImportSummary;

pub const SUPPORTED_VERSION: &str = "1.0";

#[derive(Debug, Deserialize)]
pub struct CanonicalDocument {
    pub ctdf_version: String,
    #[serde(default)]
    pub stops: Vec<Value>,
    #[serde(default)]
    pub stop_groups: Vec<Value>,
    #[serde(default)]
    pub operators: Vec<Value>,
    #[serde(default)]
    pub operator_groups: Vec<Value>,
    #[serde(default)]
    pub services: Vec<Value>,
    #[serde(default)]
    pub journeys: Vec<Value>,
}

/// Parse and validate the document root. Any failure here is fatal for the
/// import; per-record problems are dealt with later.
pub fn parse(data: &[u8]) -> Result<CanonicalDocument, ImportError> {
    let document: CanonicalDocument = serde_json::from_slice(data)
        .map_err(|e| ImportError::MalformedInput(format!("document root: {e}")))?;
    if document.ctdf_version != SUPPORTED_VERSION {
        return Err(ImportError::MalformedInput(format!(
            "ctdf_version must be {SUPPORTED_VERSION} but is {}",
            document.ctdf_version
        )));
    }
    Ok(document)
}

/// A stop record as it appears in the interchange document: a canonical stop
/// plus a classification used only during import.
#[derive(Debug, Deserialize)]
struct StopRecord {
    #[serde(flatten)]
    stop: Stop,
    /// `station`, `platform`, `entrance`, or absent for an ordinary stop.
    #[serde(default)]
    stop_type: Option<String>,
}

pub async fn import(
    store: &Store,
    document: &CanonicalDocument,
    supported: &SupportedObjects,
    datasource: &DataSource,
) -> Result<ImportSummary, ImportError> {
    let mut summary = ImportSummary::default();

    // Stop groups of type station/port are remembered so the stop pass can
    // route their member platforms and entrances into station assembly.
    let station_groups: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

    if supported.stop_groups {
        summary.add(import_stop_groups(store, &document.stop_groups, datasource, &station_groups).await?);
    }
    if supported.stops {
        summary.add(import_stops(store, &document.stops, datasource, &station_groups).await?);
    }
    if supported.operators {
        summary.add(
            import_plain(store, &document.operators, "operators", |store, mut operator: Operator| {
                operator.data_source = Some(datasource.clone());
                async move { store.upsert_operator(&operator).await }
            })
            .await?,
        );
    }
    if supported.operator_groups {
        summary.add(
            import_plain(
                store,
                &document.operator_groups,
                "operator groups",
                |store, mut group: OperatorGroup| {
                    group.data_source = Some(datasource.clone());
                    async move { store.upsert_operator_group(&group).await }
                },
            )
            .await?,
        );
    }
    if supported.services {
        summary.add(
            import_plain(store, &document.services, "services", |store, mut service: Service| {
                service.data_source = Some(datasource.clone());
                async move { store.upsert_service(&service).await }
            })
            .await?,
        );
    }
    if supported.journeys {
        summary.add(
            import_plain(store, &document.journeys, "journeys", |store, mut journey: Journey| {
                journey.data_source = Some(datasource.clone());
                async move { store.upsert_journey(&journey).await }
            })
            .await?,
        );
    }

    Ok(summary)
}

fn count(summary: &mut ImportSummary, outcome: UpsertOutcome) {
    match outcome {
        UpsertOutcome::Inserted => summary.inserted += 1,
        UpsertOutcome::Updated => summary.updated += 1,
        UpsertOutcome::Skipped => summary.skipped += 1,
    }
}

fn shard(records: &[Value], parts: usize) -> Vec<Vec<Value>> {
    if records.is_empty() {
        return Vec::new();
    }
    let batch_size = records.len().div_ceil(parts.max(1));
    records.chunks(batch_size).map(|c| c.to_vec()).collect()
}

fn worker_count() -> usize {
    available_parallelism().map(|n| n.get()).unwrap_or(4)
}

async fn import_stop_groups(
    store: &Store,
    records: &[Value],
    datasource: &DataSource,
    station_groups: &Arc<Mutex<HashSet<String>>>,
) -> Result<ImportSummary, ImportError> {
    let batches = shard(records, worker_count());
    let mut tasks = Vec::with_capacity(batches.len());

    for batch in batches {
        let store = store.clone();
        let datasource = datasource.clone();
        let station_groups = station_groups.clone();
        tasks.push(tokio::spawn(async move {
            let mut local = ImportSummary::default();
            for value in batch {
                let mut group: StopGroup = match serde_json::from_value(value) {
                    Ok(group) => group,
                    Err(e) => {
                        warn!(error = %e, "Skipping undecodable stop group record");
                        local.failed += 1;
                        continue;
                    }
                };
                group.data_source = Some(datasource.clone());
                if matches!(group.group_type.as_str(), "station" | "port") {
                    station_groups
                        .lock()
                        .unwrap()
                        .insert(group.primary_identifier.clone());
                }
                count(&mut local, store.upsert_stop_group(&group).await?);
            }
            Ok::<_, ImportError>(local)
        }));
    }

    let mut summary = ImportSummary::default();
    for task in tasks {
        summary.add(task.await??);
    }
    info!(
        inserted = summary.inserted,
        updated = summary.updated,
        skipped = summary.skipped,
        failed = summary.failed,
        "Imported stop groups"
    );
    Ok(summary)
}

type StationMembers = Arc<Mutex<HashMap<String, Vec<(String, Stop)>>>>;

async fn import_stops(
    store: &Store,
    records: &[Value],
    datasource: &DataSource,
    station_groups: &Arc<Mutex<HashSet<String>>>,
) -> Result<ImportSummary, ImportError> {
    let batches = shard(records, worker_count() * 10);
    let mut tasks = Vec::with_capacity(batches.len());

    // Station members and the station stops themselves are set aside by the
    // batch workers and assembled once every batch has completed.
    let station_members: StationMembers = Arc::new(Mutex::new(HashMap::new()));
    let station_stops: Arc<Mutex<Vec<Stop>>> = Arc::new(Mutex::new(Vec::new()));

    for batch in batches {
        let store = store.clone();
        let datasource = datasource.clone();
        let station_groups = station_groups.clone();
        let station_members = station_members.clone();
        let station_stops = station_stops.clone();
        tasks.push(tokio::spawn(async move {
            let mut local = ImportSummary::default();
            for value in batch {
                let record: StopRecord = match serde_json::from_value(value) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(error = %e, "Skipping undecodable stop record");
                        local.failed += 1;
                        continue;
                    }
                };
                let mut stop = record.stop;
                stop.data_source = Some(datasource.clone());

                match record.stop_type.as_deref() {
                    Some(kind @ ("platform" | "entrance")) => {
                        // Sub-stops never import standalone; they are folded
                        // into their station when it is assembled.
                        let mut claimed = false;
                        for association in &stop.associations {
                            if station_groups
                                .lock()
                                .unwrap()
                                .contains(&association.associated_identifier)
                            {
                                station_members
                                    .lock()
                                    .unwrap()
                                    .entry(association.associated_identifier.clone())
                                    .or_default()
                                    .push((kind.to_string(), stop.clone()));
                                claimed = true;
                            }
                        }
                        if !claimed {
                            local.skipped += 1;
                        }
                    }
                    Some("station") => {
                        station_stops.lock().unwrap().push(stop);
                    }
                    _ => {
                        count(&mut local, store.upsert_stop(&stop).await?);
                    }
                }
            }
            Ok::<_, ImportError>(local)
        }));
    }

    let mut summary = ImportSummary::default();
    for task in tasks {
        summary.add(task.await??);
    }

    // Assembly pass: every station stop absorbs the platforms and entrances
    // of the station groups it belongs to. All batch workers have been
    // joined, so the shared maps are quiescent.
    let members = std::mem::take(&mut *station_members.lock().unwrap());
    let stations = station_stops.lock().unwrap().drain(..).collect::<Vec<_>>();

    for mut station in stations {
        for association in station.associations.clone() {
            let Some(group_members) = members.get(&association.associated_identifier) else {
                continue;
            };
            for (kind, member) in group_members {
                match kind.as_str() {
                    "platform" => station.platforms.push(StopPlatform {
                        primary_identifier: member.primary_identifier.clone(),
                        other_identifiers: member.other_identifiers.clone(),
                        primary_name: member.primary_name.clone(),
                        other_names: member.other_names.clone(),
                        location: member.location,
                    }),
                    "entrance" => station.entrances.push(StopEntrance {
                        primary_identifier: member.primary_identifier.clone(),
                        other_identifiers: member.other_identifiers.clone(),
                        primary_name: member.primary_name.clone(),
                        other_names: member.other_names.clone(),
                        location: member.location,
                    }),
                    _ => {}
                }
            }
        }
        count(&mut summary, store.upsert_stop(&station).await?);
    }

    info!(
        inserted = summary.inserted,
        updated = summary.updated,
        skipped = summary.skipped,
        failed = summary.failed,
        "Imported stops"
    );
    Ok(summary)
}

/// Sequential import for the collections without a mandated fan-out.
async fn import_plain<T, F, Fut>(
    store: &Store,
    records: &[Value],
    label: &'static str,
    upsert: F,
) -> Result<ImportSummary, ImportError>
where
    T: serde::de::DeserializeOwned,
    F: Fn(Store, T) -> Fut,
    Fut: std::future::Future<Output = Result<UpsertOutcome, crate::store::StoreError>>,
{
    let mut summary = ImportSummary::default();
    for value in records {
        let entity: T = match serde_json::from_value(value.clone()) {
            Ok(entity) => entity,
            Err(e) => {
                warn!(error = %e, collection = label, "Skipping undecodable record");
                summary.failed += 1;
                continue;
            }
        };
        count(&mut summary, upsert(store.clone(), entity).await?);
    }
    info!(
        inserted = summary.inserted,
        updated = summary.updated,
        skipped = summary.skipped,
        failed = summary.failed,
        "Imported {label}"
    );
    Ok(summary)
}

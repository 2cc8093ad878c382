//! Dataset import engine.
//!
//! A registered dataset descriptor says where a feed lives, what format it
//! is in, and which object kinds it carries. Importing fetches the source,
//! unpacks it, hands it to the format adapter, and then, only after the
//! adapter fully succeeds, deletes records left over from earlier batches
//! of the same dataset.

mod bundle;
mod fetch;
pub mod formats;

use std::path::PathBuf;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

use crate::config::Config;
use crate::models::DataSource;
use crate::realtime::queue::EventQueue;
use crate::store::{Collection, Store, StoreError};

pub use formats::ImportSummary;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Dataset not registered: {0}")]
    DatasetNotFound(String),
    #[error("Fetch error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Fetch failed: {0}")]
    NetworkMessage(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Malformed document: {0}")]
    MalformedInput(String),
    #[error("Storage write failed: {0}")]
    Storage(#[from] StoreError),
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Realtime queue closed")]
    QueueClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataSetFormat {
    /// Canonical interchange document: JSON arrays of canonical entities.
    CtdfJson,
    /// Canonical AVL document: JSON array of vehicle activity events,
    /// destined for the realtime queue rather than the document store.
    CtdfAvlJson,
}

impl DataSetFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSetFormat::CtdfJson => "ctdf-json",
            DataSetFormat::CtdfAvlJson => "ctdf-avl-json",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleFormat {
    #[default]
    None,
    Zip,
    Gz,
    #[serde(rename = "tar.gz")]
    TarGz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportDestination {
    #[default]
    Database,
    RealtimeQueue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Provider {
    pub name: String,
    #[serde(default)]
    pub website: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SupportedObjects {
    #[serde(default)]
    pub stops: bool,
    #[serde(default)]
    pub stop_groups: bool,
    #[serde(default)]
    pub operators: bool,
    #[serde(default)]
    pub operator_groups: bool,
    #[serde(default)]
    pub services: bool,
    #[serde(default)]
    pub journeys: bool,
}

/// A registered dataset descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct DataSet {
    pub identifier: String,
    pub format: DataSetFormat,
    #[serde(default)]
    pub provider: Provider,
    /// URL or local file path.
    pub source: String,
    #[serde(default)]
    pub bundle_format: BundleFormat,
    #[serde(default)]
    pub supported_objects: SupportedObjects,
    #[serde(default)]
    pub destination: ImportDestination,
    /// Some upstreams reject requests without a browser-ish user agent.
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Import one registered dataset end to end.
pub async fn import_dataset(
    store: &Store,
    client: &reqwest::Client,
    queue: &EventQueue,
    config: &Config,
    identifier: &str,
) -> Result<ImportSummary, ImportError> {
    let dataset = config
        .datasets
        .iter()
        .find(|d| d.identifier == identifier)
        .cloned()
        .ok_or_else(|| ImportError::DatasetNotFound(identifier.to_string()))?;

    info!(
        identifier = %dataset.identifier,
        format = dataset.format.as_str(),
        provider = %dataset.provider.name,
        "Importing dataset"
    );

    let source_path = if dataset.source.starts_with("http://") || dataset.source.starts_with("https://")
    {
        fetch::download_to_file(client, &dataset, &config.import.work_dir).await?
    } else {
        PathBuf::from(&dataset.source)
    };

    let bundle_format = dataset.bundle_format;
    let raw = tokio::task::spawn_blocking(move || bundle::read_bundle(&source_path, bundle_format))
        .await??;

    let datasource = DataSource {
        original_format: dataset.format.as_str().to_string(),
        provider: dataset.provider.name.clone(),
        dataset_id: dataset.identifier.clone(),
        timestamp: Utc::now().timestamp().to_string(),
    };

    match dataset.format {
        DataSetFormat::CtdfJson => {
            let document =
                tokio::task::spawn_blocking(move || formats::ctdf_json::parse(&raw)).await??;
            let summary =
                formats::ctdf_json::import(store, &document, &dataset.supported_objects, &datasource)
                    .await?;

            // Cleanup only runs once the whole import has succeeded, so a
            // failed batch never strands the store without its old records.
            cleanup_supported(store, &dataset.supported_objects, &datasource).await?;

            info!(
                identifier = %dataset.identifier,
                inserted = summary.inserted,
                updated = summary.updated,
                skipped = summary.skipped,
                failed = summary.failed,
                "Dataset import complete"
            );
            Ok(summary)
        }
        DataSetFormat::CtdfAvlJson => {
            let events = formats::avl_json::parse(&raw, Utc::now())?;
            let submitted = events.len() as u64;
            for mut event in events {
                if event.data_source.is_none() {
                    event.data_source = Some(datasource.clone());
                }
                queue
                    .publish(crate::models::RealtimeEvent::VehicleActivity(event))
                    .await
                    .map_err(|_| ImportError::QueueClosed)?;
            }
            // Block until the fusion workers have chewed through the batch,
            // mirroring the upstream feeders' end-of-batch behaviour.
            queue.wait_until_drained().await;
            info!(identifier = %dataset.identifier, submitted, "Published AVL batch to realtime queue");
            Ok(ImportSummary {
                inserted: submitted,
                ..Default::default()
            })
        }
    }
}

async fn cleanup_supported(
    store: &Store,
    supported: &SupportedObjects,
    datasource: &DataSource,
) -> Result<(), ImportError> {
    let passes = [
        (supported.stops, Collection::Stops),
        (supported.stop_groups, Collection::StopGroups),
        (supported.operators, Collection::Operators),
        (supported.operator_groups, Collection::OperatorGroups),
        (supported.services, Collection::Services),
        (supported.journeys, Collection::Journeys),
    ];
    for (enabled, collection) in passes {
        if enabled {
            store.cleanup_stale(collection, datasource).await?;
        }
    }
    Ok(())
}

/// Periodically re-import every database-destined dataset.
pub async fn run_reference_import_loop(
    store: Store,
    client: reqwest::Client,
    queue: EventQueue,
    config: std::sync::Arc<Config>,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(
        (config.import.refresh_hours * 60 * 60).max(1),
    ));
    loop {
        interval.tick().await;
        for dataset in &config.datasets {
            if dataset.destination != ImportDestination::Database {
                continue;
            }
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match import_dataset(&store, &client, &queue, &config, &dataset.identifier).await {
                    Ok(_) => break,
                    Err(e) if attempt >= 3 => {
                        error!(dataset = %dataset.identifier, error = %e, attempts = attempt,
                               "Dataset import failed, giving up until next cycle");
                        break;
                    }
                    Err(e) => {
                        let wait_secs = 30 * attempt as u64;
                        error!(dataset = %dataset.identifier, error = %e, attempt, wait_secs,
                               "Dataset import failed, retrying");
                        tokio::time::sleep(std::time::Duration::from_secs(wait_secs)).await;
                    }
                }
            }
        }
    }
}

/// Periodically pull realtime-destined datasets and feed the queue.
pub async fn run_realtime_feed_loop(
    store: Store,
    client: reqwest::Client,
    queue: EventQueue,
    config: std::sync::Arc<Config>,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(
        config.realtime.poll_interval_secs.max(1),
    ));
    loop {
        interval.tick().await;
        for dataset in &config.datasets {
            if dataset.destination != ImportDestination::RealtimeQueue {
                continue;
            }
            if let Err(e) =
                import_dataset(&store, &client, &queue, &config, &dataset.identifier).await
            {
                error!(dataset = %dataset.identifier, error = %e, "Realtime feed poll failed");
            }
        }
    }
}

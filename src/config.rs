use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::import::DataSet;
use crate::transforms::TransformRule;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Listen address for the HTTP API.
    #[serde(default = "Config::default_listen")]
    pub listen: String,
    /// SQLite database file.
    #[serde(default = "Config::default_database_path")]
    pub database_path: String,
    /// IANA timezone schedule times are local to. Must match the feeds'
    /// timezone for correct projection, including DST transitions.
    #[serde(default = "Config::default_timezone")]
    pub timezone: String,
    /// Default user agent for feed fetches; individual datasets can
    /// override it.
    #[serde(default = "Config::default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub board: BoardConfig,

    /// Registered dataset descriptors.
    #[serde(default)]
    pub datasets: Vec<DataSet>,
    /// Presentation transform rules.
    #[serde(default)]
    pub transforms: Vec<TransformRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Fusion worker count. Each worker handles one event at a time.
    #[serde(default = "RealtimeConfig::default_consumer_count")]
    pub consumer_count: usize,
    #[serde(default = "RealtimeConfig::default_queue_capacity")]
    pub queue_capacity: usize,
    /// Minutes after its last modification that a realtime journey still
    /// counts as live.
    #[serde(default = "RealtimeConfig::default_active_cutoff_minutes")]
    pub active_cutoff_minutes: i64,
    /// How often to poll realtime-destined datasets, in seconds.
    #[serde(default = "RealtimeConfig::default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "RealtimeConfig::default_journey_cache_capacity")]
    pub journey_cache_capacity: usize,
    #[serde(default = "RealtimeConfig::default_journey_cache_ttl_minutes")]
    pub journey_cache_ttl_minutes: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            consumer_count: Self::default_consumer_count(),
            queue_capacity: Self::default_queue_capacity(),
            active_cutoff_minutes: Self::default_active_cutoff_minutes(),
            poll_interval_secs: Self::default_poll_interval_secs(),
            journey_cache_capacity: Self::default_journey_cache_capacity(),
            journey_cache_ttl_minutes: Self::default_journey_cache_ttl_minutes(),
        }
    }
}

impl RealtimeConfig {
    fn default_consumer_count() -> usize {
        10
    }
    fn default_queue_capacity() -> usize {
        2000
    }
    fn default_active_cutoff_minutes() -> i64 {
        10
    }
    fn default_poll_interval_secs() -> u64 {
        30
    }
    fn default_journey_cache_capacity() -> usize {
        8000
    }
    fn default_journey_cache_ttl_minutes() -> u64 {
        30
    }

    pub fn active_cutoff(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.active_cutoff_minutes)
    }

    pub fn journey_cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.journey_cache_ttl_minutes * 60)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    /// Where downloaded feeds land before unpacking.
    #[serde(default = "ImportConfig::default_work_dir")]
    pub work_dir: String,
    /// How often to re-import database-destined datasets, in hours.
    #[serde(default = "ImportConfig::default_refresh_hours")]
    pub refresh_hours: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            work_dir: Self::default_work_dir(),
            refresh_hours: Self::default_refresh_hours(),
        }
    }
}

impl ImportConfig {
    fn default_work_dir() -> String {
        "./data/import".to_string()
    }
    fn default_refresh_hours() -> u64 {
        24
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoardConfig {
    /// Departure count returned when the query does not specify one.
    #[serde(default = "BoardConfig::default_count")]
    pub default_count: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            default_count: Self::default_count(),
        }
    }
}

impl BoardConfig {
    fn default_count() -> usize {
        25
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Read(e.to_string()))?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Log warnings for values that will misbehave at runtime.
    pub fn validate(&self) {
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            warn!(
                timezone = %self.timezone,
                "Invalid IANA timezone, will fall back to Europe/London"
            );
        }
        if self.realtime.consumer_count == 0 {
            warn!("realtime.consumer_count is 0, no events will be processed");
        }
        for dataset in &self.datasets {
            if dataset.source.starts_with("http://") {
                warn!(
                    dataset = %dataset.identifier,
                    "Dataset source does not use HTTPS, data may be intercepted"
                );
            }
        }
    }

    pub fn parsed_timezone(&self) -> chrono_tz::Tz {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .unwrap_or(chrono_tz::Europe::London)
    }

    fn default_listen() -> String {
        "0.0.0.0:3000".to_string()
    }
    fn default_database_path() -> String {
        "./data/liveboard.db".to_string()
    }
    fn default_timezone() -> String {
        "Europe/London".to_string()
    }
    fn default_user_agent() -> String {
        "liveboard/0.3 (+https://github.com/liveboard/liveboard)".to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(String),
    #[error("Failed to parse config: {0}")]
    Parse(String),
}

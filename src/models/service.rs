use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DataSource;

/// A branded service (line) run by exactly one primary operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub primary_identifier: String,
    /// Short public-facing code, e.g. `42` or `X15`.
    pub service_name: String,
    pub operator_ref: String,

    /// Display-name substitutions keyed by stop identifier. Only applies to
    /// stops on the service's path; resolved at query time.
    #[serde(default)]
    pub stop_name_overrides: HashMap<String, String>,

    #[serde(default)]
    pub creation_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modification_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data_source: Option<DataSource>,
}

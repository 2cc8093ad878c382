use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DataSource;

/// Build a GB operator identifier from a National Operator Code.
pub fn noc_operator_id(noc: &str) -> String {
    format!("GB:NOC:{noc}")
}

/// Build a GB operator group identifier.
pub fn noc_group_id(group_id: &str) -> String {
    format!("GB:NOCGRPID:{group_id}")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub primary_identifier: String,
    /// Alternate identifiers; must not collide with any other operator's
    /// primary identifier.
    #[serde(default)]
    pub other_identifiers: Vec<String>,

    pub primary_name: String,
    #[serde(default)]
    pub other_names: Vec<String>,

    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub operator_group_ref: Option<String>,

    #[serde(default)]
    pub website: Option<String>,

    #[serde(default)]
    pub creation_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modification_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data_source: Option<DataSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorGroup {
    pub primary_identifier: String,
    pub name: String,

    #[serde(default)]
    pub creation_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modification_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data_source: Option<DataSource>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_identifier_formats() {
        assert_eq!(noc_operator_id("FOOB"), "GB:NOC:FOOB");
        assert_eq!(noc_group_id("42"), "GB:NOCGRPID:42");
    }
}

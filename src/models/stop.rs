use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::location::Location;
use super::service::Service;
use super::DataSource;

/// Build a GB NaPTAN stop identifier from an ATCO code.
pub fn atco_stop_id(atco_code: &str) -> String {
    format!("GB:ATCO:{atco_code}")
}

/// Build a GB stop group identifier from a stop area code.
pub fn stop_group_id(area_code: &str) -> String {
    format!("GB:STOPGRP:{area_code}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Bus,
    Coach,
    Tram,
    Rail,
    Metro,
    Ferry,
    #[serde(other)]
    Unknown,
}

/// Membership link between a stop and a stop group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    #[serde(rename = "type")]
    pub association_type: String,
    pub associated_identifier: String,
}

/// A platform within a station stop. Platforms do not exist as standalone
/// stops; they are fixed into their parent station at import time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopPlatform {
    pub primary_identifier: String,
    #[serde(default)]
    pub other_identifiers: HashMap<String, String>,
    pub primary_name: String,
    #[serde(default)]
    pub other_names: HashMap<String, String>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopEntrance {
    pub primary_identifier: String,
    #[serde(default)]
    pub other_identifiers: HashMap<String, String>,
    pub primary_name: String,
    #[serde(default)]
    pub other_names: HashMap<String, String>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub primary_identifier: String,
    /// Named cross-references into other identifier schemes,
    /// e.g. `Tiploc`, `Crs`, `AtcoCode`.
    #[serde(default)]
    pub other_identifiers: HashMap<String, String>,

    pub primary_name: String,
    #[serde(default)]
    pub other_names: HashMap<String, String>,

    #[serde(default)]
    pub transport_types: Vec<TransportMode>,
    #[serde(default)]
    pub active: bool,

    pub location: Option<Location>,

    #[serde(default)]
    pub associations: Vec<Association>,
    #[serde(default)]
    pub platforms: Vec<StopPlatform>,
    #[serde(default)]
    pub entrances: Vec<StopEntrance>,

    #[serde(default)]
    pub creation_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modification_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data_source: Option<DataSource>,
}

impl Stop {
    /// The stop's own identifier plus every platform identifier. Service
    /// name overrides may be keyed by any of these.
    pub fn all_stop_ids(&self) -> Vec<&str> {
        let mut ids = vec![self.primary_identifier.as_str()];
        ids.extend(self.platforms.iter().map(|p| p.primary_identifier.as_str()));
        ids
    }

    /// Substitute the display name with a service's override, if one is keyed
    /// by this stop or any of its platforms. Applied at query time only;
    /// never persisted.
    pub fn update_name_from_service_overrides(&mut self, service: &Service) {
        for stop_id in self
            .all_stop_ids()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
        {
            if let Some(name) = service.stop_name_overrides.get(&stop_id) {
                if !name.is_empty() {
                    self.primary_name = name.clone();
                    return;
                }
            }
        }
    }
}

/// A named cluster of stops, e.g. a NaPTAN stop area. Groups of type
/// `station` or `port` get their member platforms and entrances folded into
/// a single station stop at import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopGroup {
    pub primary_identifier: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub group_type: String,
    #[serde(default)]
    pub status: String,

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
    fn stop_identifier_formats() {
        assert_eq!(atco_stop_id("490008660N"), "GB:ATCO:490008660N");
        assert_eq!(stop_group_id("940GZZLUASL"), "GB:STOPGRP:940GZZLUASL");
    }

    fn stop_with_platform() -> Stop {
        Stop {
            primary_identifier: "GB:ATCO:490008660N".into(),
            primary_name: "Imported Name".into(),
            active: true,
            platforms: vec![StopPlatform {
                primary_identifier: "GB:ATCO:9100ASHFKY1".into(),
                other_identifiers: HashMap::new(),
                primary_name: "Platform 1".into(),
                other_names: HashMap::new(),
                location: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn all_stop_ids_includes_platforms() {
        let stop = stop_with_platform();
        assert_eq!(
            stop.all_stop_ids(),
            vec!["GB:ATCO:490008660N", "GB:ATCO:9100ASHFKY1"]
        );
    }

    #[test]
    fn service_override_by_primary_identifier() {
        let mut stop = stop_with_platform();
        let mut service = Service::default();
        service
            .stop_name_overrides
            .insert("GB:ATCO:490008660N".into(), "Overridden Name".into());

        stop.update_name_from_service_overrides(&service);
        assert_eq!(stop.primary_name, "Overridden Name");
    }

    #[test]
    fn service_override_by_platform_identifier() {
        let mut stop = stop_with_platform();
        let mut service = Service::default();
        service
            .stop_name_overrides
            .insert("GB:ATCO:9100ASHFKY1".into(), "Platform Override".into());

        stop.update_name_from_service_overrides(&service);
        assert_eq!(stop.primary_name, "Platform Override");
    }

    #[test]
    fn no_override_keeps_existing_name() {
        let mut stop = stop_with_platform();
        let mut service = Service::default();
        service
            .stop_name_overrides
            .insert("GB:ATCO:unrelated".into(), "Elsewhere".into());

        stop.update_name_from_service_overrides(&service);
        assert_eq!(stop.primary_name, "Imported Name");
    }

    #[test]
    fn empty_override_is_ignored() {
        let mut stop = stop_with_platform();
        let mut service = Service::default();
        service
            .stop_name_overrides
            .insert("GB:ATCO:490008660N".into(), String::new());

        stop.update_name_from_service_overrides(&service);
        assert_eq!(stop.primary_name, "Imported Name");
    }
}

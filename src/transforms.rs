//! Data-driven presentation patches.
//!
//! A transform rule names an entity kind, a set of field equalities to
//! match, and the field values to substitute. Rules are applied to view
//! types during response assembly through explicit per-kind dispatch;
//! field names map to getters and setters in plain code, no reflection.

use std::collections::HashMap;

use serde::Deserialize;

use crate::models::Stop;
use crate::timetable::OperatorView;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransformRule {
    /// `operator` or `stop`.
    pub entity_type: String,
    #[serde(default, rename = "match")]
    pub match_fields: HashMap<String, String>,
    #[serde(default)]
    pub patch: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct Transformer {
    rules: Vec<TransformRule>,
}

impl Transformer {
    pub fn new(rules: Vec<TransformRule>) -> Self {
        Self { rules }
    }

    pub fn apply_operator(&self, operator: &mut OperatorView) {
        for rule in self.rules.iter().filter(|r| r.entity_type == "operator") {
            let matches = rule
                .match_fields
                .iter()
                .all(|(field, value)| operator_field(operator, field) == Some(value.as_str()));
            if matches {
                for (field, value) in &rule.patch {
                    set_operator_field(operator, field, value);
                }
            }
        }
    }

    pub fn apply_stop(&self, stop: &mut Stop) {
        for rule in self.rules.iter().filter(|r| r.entity_type == "stop") {
            let matches = rule
                .match_fields
                .iter()
                .all(|(field, value)| stop_field(stop, field) == Some(value.as_str()));
            if matches {
                for (field, value) in &rule.patch {
                    set_stop_field(stop, field, value);
                }
            }
        }
    }
}

fn operator_field<'a>(operator: &'a OperatorView, field: &str) -> Option<&'a str> {
    match field {
        "primary_identifier" => Some(&operator.primary_identifier),
        "primary_name" => Some(&operator.primary_name),
        _ => None,
    }
}

fn set_operator_field(operator: &mut OperatorView, field: &str, value: &str) {
    match field {
        "primary_name" => operator.primary_name = value.to_string(),
        _ => {}
    }
}

fn stop_field<'a>(stop: &'a Stop, field: &str) -> Option<&'a str> {
    match field {
        "primary_identifier" => Some(&stop.primary_identifier),
        "primary_name" => Some(&stop.primary_name),
        _ => None,
    }
}

fn set_stop_field(stop: &mut Stop, field: &str, value: &str) {
    match field {
        "primary_name" => stop.primary_name = value.to_string(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rename_rule() -> TransformRule {
        TransformRule {
            entity_type: "operator".into(),
            match_fields: HashMap::from([(
                "primary_identifier".to_string(),
                "GB:NOC:FOOB".to_string(),
            )]),
            patch: HashMap::from([("primary_name".to_string(), "Foo Buses of Barton".to_string())]),
        }
    }

    #[test]
    fn matching_operator_is_patched() {
        let transformer = Transformer::new(vec![rename_rule()]);
        let mut operator = OperatorView {
            primary_identifier: "GB:NOC:FOOB".into(),
            primary_name: "FOO BUSES LTD".into(),
        };
        transformer.apply_operator(&mut operator);
        assert_eq!(operator.primary_name, "Foo Buses of Barton");
    }

    #[test]
    fn non_matching_operator_is_untouched() {
        let transformer = Transformer::new(vec![rename_rule()]);
        let mut operator = OperatorView {
            primary_identifier: "GB:NOC:BARB".into(),
            primary_name: "Bar Buses".into(),
        };
        transformer.apply_operator(&mut operator);
        assert_eq!(operator.primary_name, "Bar Buses");
    }

    #[test]
    fn rule_with_unknown_match_field_never_matches() {
        let mut rule = rename_rule();
        rule.match_fields
            .insert("colour".to_string(), "red".to_string());
        let transformer = Transformer::new(vec![rule]);
        let mut operator = OperatorView {
            primary_identifier: "GB:NOC:FOOB".into(),
            primary_name: "FOO BUSES LTD".into(),
        };
        transformer.apply_operator(&mut operator);
        assert_eq!(operator.primary_name, "FOO BUSES LTD");
    }

    #[test]
    fn stop_rules_patch_display_name() {
        let transformer = Transformer::new(vec![TransformRule {
            entity_type: "stop".into(),
            match_fields: HashMap::from([(
                "primary_identifier".to_string(),
                "GB:ATCO:1000".to_string(),
            )]),
            patch: HashMap::from([("primary_name".to_string(), "High Street (North)".to_string())]),
        }]);

        let mut stop = Stop {
            primary_identifier: "GB:ATCO:1000".into(),
            primary_name: "High St".into(),
            ..Default::default()
        };
        transformer.apply_stop(&mut stop);
        assert_eq!(stop.primary_name, "High Street (North)");

        let mut other = Stop {
            primary_identifier: "GB:ATCO:2000".into(),
            primary_name: "Low St".into(),
            ..Default::default()
        };
        transformer.apply_stop(&mut other);
        assert_eq!(other.primary_name, "Low St");
    }
}

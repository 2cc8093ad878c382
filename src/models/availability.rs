use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A single data-driven availability rule.
///
/// Rule types are strings so that importers can carry source-specific rules
/// through without a schema change; unknown types simply never match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    #[serde(rename = "type")]
    pub rule_type: String,
    pub value: String,
    #[serde(default)]
    pub description: String,
}

/// When a scheduled journey operates.
///
/// Four disjoint rule sets, evaluated in a fixed order:
/// 1. a non-empty `condition` set gates everything: no matching condition,
///    no service;
/// 2. any matching `exclude` rule vetoes the date;
/// 3. any matching `match` rule (or failing that `match_secondary`) accepts;
/// 4. otherwise the journey does not run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    #[serde(default)]
    pub condition: Vec<AvailabilityRule>,
    #[serde(default, rename = "match")]
    pub match_rules: Vec<AvailabilityRule>,
    #[serde(default)]
    pub match_secondary: Vec<AvailabilityRule>,
    #[serde(default)]
    pub exclude: Vec<AvailabilityRule>,
}

impl Availability {
    pub fn matches_date(&self, date: NaiveDate) -> bool {
        if !self.condition.is_empty() && !self.condition.iter().any(|r| rule_matches(r, date)) {
            return false;
        }
        if self.exclude.iter().any(|r| rule_matches(r, date)) {
            return false;
        }
        if self.match_rules.iter().any(|r| rule_matches(r, date)) {
            return true;
        }
        if self.match_secondary.iter().any(|r| rule_matches(r, date)) {
            return true;
        }
        false
    }

    /// All rules across the four sets in the canonical order, used by the
    /// functional hash.
    pub fn all_rules(&self) -> impl Iterator<Item = &AvailabilityRule> {
        self.condition
            .iter()
            .chain(self.match_rules.iter())
            .chain(self.match_secondary.iter())
            .chain(self.exclude.iter())
    }
}

fn rule_matches(rule: &AvailabilityRule, date: NaiveDate) -> bool {
    match rule.rule_type.as_str() {
        "DaysOfWeek" => {
            let day = weekday_name(date.weekday());
            rule.value
                .split(',')
                .any(|d| d.trim().eq_ignore_ascii_case(day))
        }
        "Date" => NaiveDate::parse_from_str(rule.value.trim(), "%Y-%m-%d")
            .map(|d| d == date)
            .unwrap_or(false),
        "DateRange" => match rule.value.split_once(':') {
            Some((start, end)) => {
                let after_start = match parse_optional_date(start) {
                    Some(s) => date >= s,
                    None => true,
                };
                let before_end = match parse_optional_date(end) {
                    Some(e) => date <= e,
                    None => true,
                };
                after_start && before_end
            }
            None => false,
        },
        other => {
            debug!(rule_type = other, "Unknown availability rule type never matches");
            false
        }
    }
}

fn parse_optional_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

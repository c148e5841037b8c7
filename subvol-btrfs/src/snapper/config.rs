// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Settings of one snapper config as reported by `snapper get-config`
///
/// Values stay strings; the typed accessors cover the keys that get edited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapperConfig(BTreeMap<String, String>);

impl SnapperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Snapper writes booleans as `yes` and `no`
    pub fn bool_value(&self, key: &str, default: bool) -> bool {
        self.get(key).map_or(default, |value| value == "yes")
    }

    pub fn insert_bool(&mut self, key: &str, value: bool) {
        self.insert(key, if value { "yes" } else { "no" });
    }

    pub fn int_value(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn insert_int(&mut self, key: &str, value: i64) {
        self.insert(key, value.to_string());
    }

    pub fn subvolume(&self) -> Option<&str> {
        self.get("SUBVOLUME")
    }

    pub fn set_subvolume(&mut self, value: &str) {
        self.insert("SUBVOLUME", value);
    }

    pub fn timeline_create(&self) -> bool {
        self.bool_value("TIMELINE_CREATE", false)
    }

    pub fn set_timeline_create(&mut self, value: bool) {
        self.insert_bool("TIMELINE_CREATE", value);
    }

    pub fn timeline_limit_hourly(&self) -> i64 {
        self.int_value("TIMELINE_LIMIT_HOURLY", 0)
    }

    pub fn set_timeline_limit_hourly(&mut self, value: i64) {
        self.insert_int("TIMELINE_LIMIT_HOURLY", value);
    }

    pub fn timeline_limit_daily(&self) -> i64 {
        self.int_value("TIMELINE_LIMIT_DAILY", 0)
    }

    pub fn set_timeline_limit_daily(&mut self, value: i64) {
        self.insert_int("TIMELINE_LIMIT_DAILY", value);
    }

    pub fn timeline_limit_weekly(&self) -> i64 {
        self.int_value("TIMELINE_LIMIT_WEEKLY", 0)
    }

    pub fn set_timeline_limit_weekly(&mut self, value: i64) {
        self.insert_int("TIMELINE_LIMIT_WEEKLY", value);
    }

    pub fn timeline_limit_monthly(&self) -> i64 {
        self.int_value("TIMELINE_LIMIT_MONTHLY", 0)
    }

    pub fn set_timeline_limit_monthly(&mut self, value: i64) {
        self.insert_int("TIMELINE_LIMIT_MONTHLY", value);
    }

    pub fn timeline_limit_yearly(&self) -> i64 {
        self.int_value("TIMELINE_LIMIT_YEARLY", 0)
    }

    pub fn set_timeline_limit_yearly(&mut self, value: i64) {
        self.insert_int("TIMELINE_LIMIT_YEARLY", value);
    }

    pub fn number_limit(&self) -> i64 {
        self.int_value("NUMBER_LIMIT", 0)
    }

    pub fn set_number_limit(&mut self, value: i64) {
        self.insert_int("NUMBER_LIMIT", value);
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SnapperConfig {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Archiving schedule: which pathpoints to re-read at which interval.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value as Json;

use crate::store::backend::StateBackend;

const DOMAIN: &str = "archive";

/// Decode the cloud's schedule: `[{interval, pathpoints: [...]}]`.
pub fn parse_schedule(value: &Json) -> HashMap<u64, Vec<String>> {
    let mut schedule = HashMap::new();
    let Some(items) = value.as_array() else { return schedule };
    for item in items {
        let Some(interval) = item.get("interval").and_then(Json::as_u64) else { continue };
        let Some(paths) = item.get("pathpoints").and_then(Json::as_array) else { continue };
        let names: Vec<String> =
            paths.iter().filter_map(|p| p.as_str().map(str::to_owned)).collect();
        schedule.insert(interval, names);
    }
    schedule
}

/// One pathpoint due for periodic re-reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivingEntry {
    pub pathpoint: String,
    pub interval_s: u64,
    pub last_updated_s: u64,
}

impl ArchivingEntry {
    pub fn new(pathpoint: impl Into<String>, interval_s: u64) -> Self {
        Self { pathpoint: pathpoint.into(), interval_s, last_updated_s: 0 }
    }

    pub fn is_due(&self, now_s: u64) -> bool {
        now_s.saturating_sub(self.last_updated_s) > self.interval_s
    }

    pub fn mark_updated(&mut self, now_s: u64) {
        self.last_updated_s = now_s;
    }
}

/// Persisted archiving instructions.
pub struct ArchiveStore {
    schedule: Mutex<HashMap<u64, Vec<String>>>,
    backend: Arc<dyn StateBackend>,
}

impl ArchiveStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Arc<Self> {
        let mut schedule = HashMap::new();
        if let Some(bytes) = backend.load(DOMAIN) {
            if let Ok(value) = serde_json::from_slice::<Json>(&bytes) {
                schedule = parse_schedule(&value);
            }
        }
        Arc::new(Self { schedule: Mutex::new(schedule), backend })
    }

    pub fn instructions(&self) -> HashMap<u64, Vec<String>> {
        self.schedule.lock().clone()
    }

    pub fn on_sync(&self, schedule: HashMap<u64, Vec<String>>) {
        let wire: Vec<Json> = schedule
            .iter()
            .map(|(interval, paths)| serde_json::json!({"interval": interval, "pathpoints": paths}))
            .collect();
        *self.schedule.lock() = schedule;
        if let Ok(bytes) = serde_json::to_vec(&wire) {
            self.backend.persist(DOMAIN, &bytes);
        }
    }
}

#[cfg(test)]
#[path = "archive_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local sensor catalog, rebuilt from the cloud on each sensor sync.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::sensor::{fqtsify, Sensor};

/// Catalog of sensors keyed by canonical tag set.
pub struct SensorStore {
    sensors: RwLock<HashMap<String, Sensor>>,
}

impl SensorStore {
    pub fn new() -> Self {
        Self { sensors: RwLock::new(HashMap::new()) }
    }

    /// Replace the whole catalog with the authoritative list.
    pub fn on_sync(&self, sensors: Vec<Sensor>) {
        let mut map = HashMap::with_capacity(sensors.len());
        for sensor in sensors {
            map.insert(sensor.fqts.clone(), sensor);
        }
        *self.sensors.write() = map;
    }

    /// Look a sensor up by tag set (canonicalized here).
    pub fn get(&self, tag_set: &str) -> Option<Sensor> {
        self.sensors.read().get(&fqtsify(tag_set)).cloned()
    }

    pub fn all(&self) -> Vec<Sensor> {
        self.sensors.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sensors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.read().is_empty()
    }
}

impl Default for SensorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "sensors_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue of sensor-write audit records awaiting cloud upload.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value as Json;
use tokio::sync::Notify;

use crate::sensor::SensorWriteEvent;
use crate::store::backend::StateBackend;

const DOMAIN: &str = "sensor_writes";

/// Pending sensor-write audit log, same single-snapshot discipline as
/// the sample store.
pub struct AuditStore {
    events: Mutex<Vec<SensorWriteEvent>>,
    snapshot_out: AtomicBool,
    backend: Arc<dyn StateBackend>,
    signal: Arc<Notify>,
}

impl AuditStore {
    pub fn new(backend: Arc<dyn StateBackend>, signal: Arc<Notify>) -> Arc<Self> {
        let mut events = Vec::new();
        if let Some(bytes) = backend.load(DOMAIN) {
            if let Ok(value) = serde_json::from_slice::<Json>(&bytes) {
                if let Some(items) = value.as_array() {
                    events = items.iter().filter_map(SensorWriteEvent::from_wire).collect();
                }
            }
        }
        Arc::new(Self {
            events: Mutex::new(events),
            snapshot_out: AtomicBool::new(false),
            backend,
            signal,
        })
    }

    pub fn add(&self, event: SensorWriteEvent) {
        self.events.lock().push(event);
        self.signal.notify_one();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn snapshot_for_sync(self: &Arc<Self>) -> Option<AuditSnapshot> {
        let events = {
            let events = self.events.lock();
            if events.is_empty() {
                return None;
            }
            events.clone()
        };
        if self.snapshot_out.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(AuditSnapshot { store: Arc::clone(self), events })
    }

    pub fn checkpoint(&self, force: bool) {
        let wire: Vec<Json> = self.events.lock().iter().map(SensorWriteEvent::to_wire).collect();
        let Ok(bytes) = serde_json::to_vec(&wire) else { return };
        if force {
            self.backend.persist_now(DOMAIN, &bytes);
        } else {
            self.backend.persist(DOMAIN, &bytes);
        }
    }

    fn apply_ack(&self, synced: &[SensorWriteEvent]) {
        self.events.lock().retain(|e| !synced.contains(e));
    }

    fn release_snapshot(&self) {
        self.snapshot_out.store(false, Ordering::Release);
    }
}

/// One outstanding audit upload batch.
pub struct AuditSnapshot {
    store: Arc<AuditStore>,
    events: Vec<SensorWriteEvent>,
}

impl AuditSnapshot {
    pub fn as_wire(&self) -> Json {
        Json::Array(self.events.iter().map(SensorWriteEvent::to_wire).collect())
    }

    pub fn ack(self) {
        self.store.apply_ack(&self.events);
    }

    pub fn nack(self) {}
}

impl Drop for AuditSnapshot {
    fn drop(&mut self) {
        self.store.release_snapshot();
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;

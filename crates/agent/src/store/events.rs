// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store of alert events pending synchronization, plus the per-predicate
//! private state cache.
//!
//! Open events are re-announced every pass until closed (the cloud
//! de-duplicates by UUID); a closed event leaves memory once its closure
//! has been acknowledged, or after the retention window regardless.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value as Json;
use tokio::sync::Notify;

use crate::clock::now_s;
use crate::event::Event;
use crate::store::backend::StateBackend;

const DOMAIN: &str = "events";
const CACHE_DOMAIN: &str = "predicate_state";

/// Closed events older than this are evicted even when never acked.
pub const DEFAULT_RETENTION_S: u64 = 30 * 24 * 3600;

struct Inner {
    events: Vec<Event>,
    /// Provisional ids pending synchronization, in announcement order.
    pending: Vec<String>,
    caches: HashMap<String, Json>,
}

/// C2 — the event store.
pub struct EventStore {
    state: Mutex<Inner>,
    snapshot_out: AtomicBool,
    backend: Arc<dyn StateBackend>,
    signal: Arc<Notify>,
    retention_s: u64,
}

impl EventStore {
    pub fn new(backend: Arc<dyn StateBackend>, signal: Arc<Notify>) -> Arc<Self> {
        Self::with_retention(backend, signal, DEFAULT_RETENTION_S)
    }

    pub fn with_retention(
        backend: Arc<dyn StateBackend>,
        signal: Arc<Notify>,
        retention_s: u64,
    ) -> Arc<Self> {
        let mut inner = Inner { events: Vec::new(), pending: Vec::new(), caches: HashMap::new() };
        if let Some(bytes) = backend.load(DOMAIN) {
            if let Ok(value) = serde_json::from_slice::<Json>(&bytes) {
                if let Some(events) = value.get("events").and_then(Json::as_array) {
                    inner.events = events.iter().filter_map(Event::from_wire).collect();
                }
                if let Some(pending) = value.get("pending").and_then(Json::as_array) {
                    inner.pending = pending
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_owned))
                        .collect();
                }
            }
        }
        if let Some(bytes) = backend.load(CACHE_DOMAIN) {
            if let Ok(caches) = serde_json::from_slice(&bytes) {
                inner.caches = caches;
            }
        }
        Arc::new(Self {
            state: Mutex::new(inner),
            snapshot_out: AtomicBool::new(false),
            backend,
            signal,
            retention_s,
        })
    }

    /// Register a new event and queue it for announcement.
    pub fn add(&self, event: Event) {
        let mut state = self.state.lock();
        let provisional = event.provisional_id.clone();
        state.events.push(event);
        if !state.pending.contains(&provisional) {
            state.pending.push(provisional);
        }
        drop(state);
        self.signal.notify_one();
    }

    /// Close the event known under `event_id`. Returns false when no
    /// such event exists.
    pub fn close(&self, event_id: &str, ended_on: Option<u64>) -> bool {
        let mut state = self.state.lock();
        let Some(event) = state.events.iter_mut().find(|e| e.matches_id(event_id)) else {
            return false;
        };
        if !event.is_closed() {
            event.ended_on = Some(ended_on.unwrap_or_else(now_s));
        }
        let provisional = event.provisional_id.clone();
        if !state.pending.contains(&provisional) {
            state.pending.push(provisional);
        }
        drop(state);
        self.signal.notify_one();
        true
    }

    pub fn get_open(&self) -> Vec<Event> {
        self.state.lock().events.iter().filter(|e| !e.is_closed()).cloned().collect()
    }

    pub fn get_all(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    pub fn get(&self, event_id: &str) -> Option<Event> {
        self.state.lock().events.iter().find(|e| e.matches_id(event_id)).cloned()
    }

    /// Obtain the one live snapshot of events pending announcement.
    pub fn snapshot_for_sync(self: &Arc<Self>) -> Option<EventSnapshot> {
        let events: Vec<Event> = {
            let state = self.state.lock();
            if state.pending.is_empty() {
                return None;
            }
            state
                .pending
                .iter()
                .filter_map(|id| state.events.iter().find(|e| &e.provisional_id == id))
                .cloned()
                .collect()
        };
        if events.is_empty() {
            // Pending ids whose events are gone; flush them.
            self.state.lock().pending.clear();
            return None;
        }
        if self.snapshot_out.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(EventSnapshot { store: Arc::clone(self), events })
    }

    /// Predicate-private state, persisted across ticks and restarts.
    pub fn set_cache(&self, predicate_id: &str, value: Json) {
        let mut state = self.state.lock();
        state.caches.insert(predicate_id.to_owned(), value);
        let caches = state.caches.clone();
        drop(state);
        self.persist_caches(&caches);
    }

    pub fn get_cache(&self, predicate_id: &str) -> Option<Json> {
        self.state.lock().caches.get(predicate_id).cloned()
    }

    pub fn on_predicate_deleted(&self, predicate_id: &str) {
        let mut state = self.state.lock();
        if state.caches.remove(predicate_id).is_some() {
            let caches = state.caches.clone();
            drop(state);
            self.persist_caches(&caches);
        }
    }

    /// Evict expired closed events and persist.
    pub fn checkpoint(&self, force: bool) {
        let dump = {
            let mut state = self.state.lock();
            let cutoff = now_s().saturating_sub(self.retention_s);
            let expired: Vec<String> = state
                .events
                .iter()
                .filter(|e| e.is_closed() && e.started_on < cutoff)
                .map(|e| e.provisional_id.clone())
                .collect();
            if !expired.is_empty() {
                state.events.retain(|e| !expired.contains(&e.provisional_id));
                state.pending.retain(|id| !expired.contains(id));
            }
            serde_json::json!({
                "events": state.events.iter().map(Event::to_stored).collect::<Vec<_>>(),
                "pending": state.pending,
            })
        };
        let Ok(bytes) = serde_json::to_vec(&dump) else { return };
        if force {
            self.backend.persist_now(DOMAIN, &bytes);
        } else {
            self.backend.persist(DOMAIN, &bytes);
        }
    }

    fn persist_caches(&self, caches: &HashMap<String, Json>) {
        if let Ok(bytes) = serde_json::to_vec(caches) {
            self.backend.persist(CACHE_DOMAIN, &bytes);
        }
    }

    fn apply_ack(&self, announced: &[Event], assigned: &[String]) {
        let mut state = self.state.lock();
        for (event, uuid) in announced.iter().zip(assigned.iter()) {
            if let Some(stored) =
                state.events.iter_mut().find(|e| e.provisional_id == event.provisional_id)
            {
                if stored.id.is_none() {
                    stored.id = Some(uuid.clone());
                }
            }
        }
        // Closed events leave memory once their closure is acked; open
        // ones stay pending until closed.
        let closed: Vec<String> = announced
            .iter()
            .filter(|e| e.is_closed())
            .map(|e| e.provisional_id.clone())
            .collect();
        state.events.retain(|e| !closed.contains(&e.provisional_id));
        state.pending.retain(|id| !closed.contains(id));
    }

    fn release_snapshot(&self) {
        self.snapshot_out.store(false, Ordering::Release);
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

/// One outstanding event announcement batch.
pub struct EventSnapshot {
    store: Arc<EventStore>,
    events: Vec<Event>,
}

impl EventSnapshot {
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn as_wire(&self) -> Json {
        Json::Array(self.events.iter().map(Event::to_wire).collect())
    }

    /// The cloud accepted the batch and assigned UUIDs, in order, to the
    /// announced events.
    pub fn ack(self, assigned: &[String]) {
        self.store.apply_ack(&self.events, assigned);
    }

    pub fn nack(self) {}
}

impl Drop for EventSnapshot {
    fn drop(&mut self) {
        self.store.release_snapshot();
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plain per-device metadata: a small KV store mirrored with the cloud.
//!
//! Reads come from the local copy while it is fresh (TTL-guarded) and
//! fall back to the cloud; writes apply locally at once and queue an
//! upload drained by the archive & macro worker.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value as Json;

use crate::clock::now_s;
use crate::store::backend::StateBackend;

const DOMAIN: &str = "metadata";

/// A queued metadata mutation. `value: None` is a deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub key: String,
    pub value: Option<String>,
    pub timestamp_s: u64,
}

struct Inner {
    entries: HashMap<String, (String, u64)>,
    fetched_at: HashMap<String, Instant>,
    pending: VecDeque<PendingUpdate>,
}

/// Local metadata store.
pub struct MetadataStore {
    state: Mutex<Inner>,
    backend: Arc<dyn StateBackend>,
    ttl: Duration,
}

impl MetadataStore {
    pub fn new(backend: Arc<dyn StateBackend>, ttl: Duration) -> Arc<Self> {
        let mut inner =
            Inner { entries: HashMap::new(), fetched_at: HashMap::new(), pending: VecDeque::new() };
        if let Some(bytes) = backend.load(DOMAIN) {
            if let Ok(value) = serde_json::from_slice::<Json>(&bytes) {
                if let Some(entries) = value.get("entries").and_then(Json::as_object) {
                    for (key, entry) in entries {
                        let (Some(v), Some(ts)) = (
                            entry.get("value").and_then(Json::as_str),
                            entry.get("timestamp").and_then(Json::as_u64),
                        ) else {
                            continue;
                        };
                        inner.entries.insert(key.clone(), (v.to_owned(), ts));
                    }
                }
                if let Some(pending) = value.get("pending").and_then(Json::as_array) {
                    for item in pending {
                        let Some(key) = item.get("key").and_then(Json::as_str) else { continue };
                        inner.pending.push_back(PendingUpdate {
                            key: key.to_owned(),
                            value: item
                                .get("value")
                                .and_then(Json::as_str)
                                .map(str::to_owned),
                            timestamp_s: item
                                .get("timestamp")
                                .and_then(Json::as_u64)
                                .unwrap_or_else(now_s),
                        });
                    }
                }
            }
        }
        Arc::new(Self { state: Mutex::new(inner), backend, ttl })
    }

    /// Locally known value, regardless of freshness.
    pub fn get_local(&self, key: &str) -> Option<String> {
        self.state.lock().entries.get(key).map(|(v, _)| v.clone())
    }

    /// Whether a cloud round-trip is due for this key.
    pub fn needs_refresh(&self, key: &str) -> bool {
        let state = self.state.lock();
        if !state.entries.contains_key(key) {
            return true;
        }
        match state.fetched_at.get(key) {
            Some(at) => at.elapsed() >= self.ttl,
            // Locally written values are authoritative until overwritten.
            None => false,
        }
    }

    /// A user write: applies locally and queues the upload.
    pub fn put(&self, key: &str, value: &str) {
        let now = now_s();
        let mut state = self.state.lock();
        state.entries.insert(key.to_owned(), (value.to_owned(), now));
        state.fetched_at.remove(key);
        state.pending.push_back(PendingUpdate {
            key: key.to_owned(),
            value: Some(value.to_owned()),
            timestamp_s: now,
        });
    }

    /// A user deletion: applies locally and queues the removal.
    pub fn delete(&self, key: &str) {
        let now = now_s();
        let mut state = self.state.lock();
        state.entries.remove(key);
        state.fetched_at.remove(key);
        state.pending.push_back(PendingUpdate { key: key.to_owned(), value: None, timestamp_s: now });
    }

    /// Record what the cloud reports for `key`.
    pub fn update_from_server(&self, key: &str, value: &str, timestamp_s: u64) {
        let mut state = self.state.lock();
        state.entries.insert(key.to_owned(), (value.to_owned(), timestamp_s));
        state.fetched_at.insert(key.to_owned(), Instant::now());
    }

    /// Take the next queued upload, if any.
    pub fn pop_pending(&self) -> Option<PendingUpdate> {
        self.state.lock().pending.pop_front()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn checkpoint(&self, force: bool) {
        let dump = {
            let state = self.state.lock();
            serde_json::json!({
                "entries": state
                    .entries
                    .iter()
                    .map(|(k, (v, ts))| (k.clone(), serde_json::json!({"value": v, "timestamp": ts})))
                    .collect::<serde_json::Map<_, _>>(),
                "pending": state
                    .pending
                    .iter()
                    .map(|p| serde_json::json!({"key": p.key, "value": p.value, "timestamp": p.timestamp_s}))
                    .collect::<Vec<_>>(),
            })
        };
        let Ok(bytes) = serde_json::to_vec(&dump) else { return };
        if force {
            self.backend.persist_now(DOMAIN, &bytes);
        } else {
            self.backend.persist(DOMAIN, &bytes);
        }
    }
}

/// Percent-encode a metadata key for use as one URL path segment.
pub fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
#[path = "metadata_tests.rs"]
mod tests;

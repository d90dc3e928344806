// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyed binary objects with a monotonic version, reconciled against the
//! cloud in three directions (download, upload, delete).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::store::backend::BlobBackend;

/// Version reported for a key that does not exist.
pub const ABSENT_VERSION: i64 = -1;

struct Entry {
    version: i64,
    bytes: Vec<u8>,
}

/// Local blob store.
pub struct BlobStore {
    entries: Mutex<HashMap<String, Entry>>,
    backend: Arc<dyn BlobBackend>,
    signal: Arc<Notify>,
}

impl BlobStore {
    pub fn new(backend: Arc<dyn BlobBackend>, signal: Arc<Notify>) -> Arc<Self> {
        let mut entries = HashMap::new();
        for (key, version, bytes) in backend.load_all() {
            entries.insert(key, Entry { version, bytes });
        }
        Arc::new(Self { entries: Mutex::new(entries), backend, signal })
    }

    /// Version of `key`, [`ABSENT_VERSION`] when it does not exist.
    pub fn version(&self, key: &str) -> i64 {
        self.entries.lock().get(key).map_or(ABSENT_VERSION, |e| e.version)
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(key).map(|e| e.bytes.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Shape reported to the cloud for reconciliation.
    pub fn digest(&self) -> Vec<(String, i64)> {
        self.entries.lock().iter().map(|(k, e)| (k.clone(), e.version)).collect()
    }

    /// A local write: bumps the version by one and wakes the
    /// communicator so the new revision uploads promptly.
    pub fn put_local(&self, key: &str, bytes: Vec<u8>) -> i64 {
        let version = self.version(key) + 1;
        self.set(key, bytes, version);
        self.signal.notify_one();
        version
    }

    /// Store a revision at an explicit version (cloud download).
    pub fn set(&self, key: &str, bytes: Vec<u8>, version: i64) {
        self.backend.put(key, version, &bytes);
        self.entries.lock().insert(key.to_owned(), Entry { version, bytes });
    }

    /// Remove a key locally. Returns false when it did not exist.
    pub fn delete(&self, key: &str) -> bool {
        let existed = self.entries.lock().remove(key).is_some();
        if existed {
            self.backend.delete(key);
        }
        existed
    }
}

#[cfg(test)]
#[path = "blobs_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistence seams for the stores.
//!
//! A backend only has to hand back what it was last given: stores call
//! `load` once at agent init and `persist` on checkpoints. The shipped
//! implementations are a no-op memory backend and a directory backend
//! writing one dump file per domain (plus one file per key for blobs).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Persistence for queue/KV-style store domains.
pub trait StateBackend: Send + Sync {
    /// Contents persisted for `domain`, if any.
    fn load(&self, domain: &str) -> Option<Vec<u8>>;

    /// Persist `domain`. May throttle; the store calls this liberally.
    fn persist(&self, domain: &str, bytes: &[u8]);

    /// Persist bypassing any throttle, e.g. during shutdown.
    fn persist_now(&self, domain: &str, bytes: &[u8]) {
        self.persist(domain, bytes);
    }
}

/// Persistence for keyed binary objects.
pub trait BlobBackend: Send + Sync {
    /// All persisted blobs as `(key, version, bytes)`.
    fn load_all(&self) -> Vec<(String, i64, Vec<u8>)>;

    fn put(&self, key: &str, version: i64, bytes: &[u8]);

    fn delete(&self, key: &str);
}

/// Keeps nothing across restarts.
pub struct MemoryBackend;

impl StateBackend for MemoryBackend {
    fn load(&self, _domain: &str) -> Option<Vec<u8>> {
        None
    }

    fn persist(&self, _domain: &str, _bytes: &[u8]) {}
}

impl BlobBackend for MemoryBackend {
    fn load_all(&self) -> Vec<(String, i64, Vec<u8>)> {
        Vec::new()
    }

    fn put(&self, _key: &str, _version: i64, _bytes: &[u8]) {}

    fn delete(&self, _key: &str) {}
}

/// Minimum spacing between on-disk writes of the same domain.
const PERSIST_THROTTLE: Duration = Duration::from_secs(30);

/// Directory-backed persistence: `<root>/<domain>.json` per store
/// domain, `<root>/blobs/<key>` per blob plus a versions side-file.
pub struct DirBackend {
    root: PathBuf,
    last_persist: Mutex<HashMap<String, Instant>>,
}

impl DirBackend {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("blobs"))?;
        Ok(Self { root, last_persist: Mutex::new(HashMap::new()) })
    }

    fn domain_path(&self, domain: &str) -> PathBuf {
        self.root.join(format!("{domain}.json"))
    }

    fn blob_path(&self, key: &str) -> Option<PathBuf> {
        // Keys become file names; anything path-like is refused.
        if key.is_empty() || key.contains(['/', '\\', '\0']) || key.starts_with('.') {
            return None;
        }
        Some(self.root.join("blobs").join(key))
    }

    fn versions_path(&self) -> PathBuf {
        self.root.join("blob_versions.json")
    }

    fn read_versions(&self) -> HashMap<String, i64> {
        std::fs::read(self.versions_path())
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    fn write_versions(&self, versions: &HashMap<String, i64>) {
        if let Ok(bytes) = serde_json::to_vec(versions) {
            if let Err(e) = std::fs::write(self.versions_path(), bytes) {
                tracing::warn!(err = %e, "failed to persist blob versions");
            }
        }
    }

    fn write_domain(&self, domain: &str, bytes: &[u8]) {
        let path = self.domain_path(domain);
        let tmp = path.with_extension("json.tmp");
        let result = std::fs::write(&tmp, bytes).and_then(|()| std::fs::rename(&tmp, &path));
        if let Err(e) = result {
            tracing::warn!(domain, err = %e, "failed to persist store");
        }
    }
}

impl StateBackend for DirBackend {
    fn load(&self, domain: &str) -> Option<Vec<u8>> {
        std::fs::read(self.domain_path(domain)).ok()
    }

    fn persist(&self, domain: &str, bytes: &[u8]) {
        {
            let mut last = self.last_persist.lock();
            let now = Instant::now();
            if let Some(prev) = last.get(domain) {
                if now.duration_since(*prev) < PERSIST_THROTTLE {
                    return;
                }
            }
            last.insert(domain.to_owned(), now);
        }
        self.write_domain(domain, bytes);
    }

    fn persist_now(&self, domain: &str, bytes: &[u8]) {
        self.last_persist.lock().insert(domain.to_owned(), Instant::now());
        self.write_domain(domain, bytes);
    }
}

impl BlobBackend for DirBackend {
    fn load_all(&self) -> Vec<(String, i64, Vec<u8>)> {
        let versions = self.read_versions();
        let mut out = Vec::new();
        for (key, version) in versions {
            let Some(path) = self.blob_path(&key) else { continue };
            if let Ok(bytes) = std::fs::read(path) {
                out.push((key, version, bytes));
            }
        }
        out
    }

    fn put(&self, key: &str, version: i64, bytes: &[u8]) {
        let Some(path) = self.blob_path(key) else {
            tracing::warn!(key, "blob key not representable on disk, kept in memory only");
            return;
        };
        if let Err(e) = std::fs::write(path, bytes) {
            tracing::warn!(key, err = %e, "failed to persist blob");
            return;
        }
        let mut versions = self.read_versions();
        versions.insert(key.to_owned(), version);
        self.write_versions(&versions);
    }

    fn delete(&self, key: &str) {
        if let Some(path) = self.blob_path(key) {
            let _ = std::fs::remove_file(path);
        }
        let mut versions = self.read_versions();
        if versions.remove(key).is_some() {
            self.write_versions(&versions);
        }
    }
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;

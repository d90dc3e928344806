// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-facing handle to one keyed binary object.
//!
//! A blob does not signal nonexistence at construction — it reports
//! version −1 until queried after a write or a download. Assigning a
//! value creates the blob.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::store::blobs::BlobStore;

/// Handle to a single keyed binary object.
pub struct Blob {
    key: String,
    store: Arc<BlobStore>,
    resync: Arc<AtomicBool>,
    signal: Arc<Notify>,
}

impl Blob {
    pub(crate) fn new(
        key: String,
        store: Arc<BlobStore>,
        resync: Arc<AtomicBool>,
        signal: Arc<Notify>,
    ) -> Self {
        Self { key, store, resync, signal }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Version of this blob, −1 when it does not exist.
    pub fn version(&self) -> i64 {
        self.store.version(&self.key)
    }

    pub fn value(&self) -> Option<Vec<u8>> {
        self.store.value(&self.key)
    }

    /// Store a new revision locally and nudge the communicator into an
    /// early reconcile pass so the revision uploads promptly.
    pub fn set_value(&self, bytes: Vec<u8>) -> i64 {
        let version = self.store.put_local(&self.key, bytes);
        self.resync.store(true, Ordering::Release);
        self.signal.notify_one();
        version
    }
}

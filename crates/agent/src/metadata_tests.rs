// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::store::backend::{DirBackend, MemoryBackend, StateBackend};

fn store() -> Arc<MetadataStore> {
    MetadataStore::new(Arc::new(MemoryBackend), Duration::from_secs(60))
}

#[test]
fn local_write_and_read() {
    let store = store();
    assert_eq!(store.get_local("k"), None);
    store.put("k", "v");
    assert_eq!(store.get_local("k"), Some("v".to_owned()));
    store.delete("k");
    assert_eq!(store.get_local("k"), None);
}

#[test]
fn writes_queue_uploads_in_order() {
    let store = store();
    store.put("a", "1");
    store.delete("a");
    assert_eq!(store.pending_len(), 2);

    let first = store.pop_pending().expect("first");
    assert_eq!(first.key, "a");
    assert_eq!(first.value.as_deref(), Some("1"));
    let second = store.pop_pending().expect("second");
    assert_eq!(second.value, None, "deletion is value-less");
    assert!(store.pop_pending().is_none());
}

#[test]
fn unknown_key_needs_refresh_local_write_does_not() {
    let store = store();
    assert!(store.needs_refresh("k"));
    store.put("k", "v");
    assert!(!store.needs_refresh("k"));
}

#[test]
fn server_entries_age_out() {
    let store = MetadataStore::new(Arc::new(MemoryBackend), Duration::from_secs(0));
    store.update_from_server("k", "v", 123);
    assert_eq!(store.get_local("k"), Some("v".to_owned()));
    // TTL of zero: immediately stale.
    assert!(store.needs_refresh("k"));
}

#[test]
fn pending_and_entries_survive_restart() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let backend: Arc<dyn StateBackend> = Arc::new(DirBackend::new(tmp.path()).expect("backend"));

    let store = MetadataStore::new(Arc::clone(&backend), Duration::from_secs(60));
    store.put("k", "v");
    store.checkpoint(true);

    let reloaded = MetadataStore::new(backend, Duration::from_secs(60));
    assert_eq!(reloaded.get_local("k"), Some("v".to_owned()));
    assert_eq!(reloaded.pending_len(), 1);
}

#[test]
fn key_encoding() {
    assert_eq!(encode_key("plain-key_1.0~x"), "plain-key_1.0~x");
    assert_eq!(encode_key("a b/c"), "a%20b%2Fc");
    assert_eq!(encode_key("ü"), "%C3%BC");
}

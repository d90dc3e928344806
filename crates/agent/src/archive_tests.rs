// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::*;
use crate::store::backend::{DirBackend, MemoryBackend, StateBackend};

#[test]
fn schedule_decodes() {
    let schedule = parse_schedule(&serde_json::json!([
        {"interval": 60, "pathpoints": ["W1", "W2"]},
        {"interval": 600, "pathpoints": ["d3"]},
        {"interval": 1, "bogus": true},
    ]));
    assert_eq!(schedule.len(), 2);
    assert_eq!(schedule.get(&60), Some(&vec!["W1".to_owned(), "W2".to_owned()]));
    assert_eq!(schedule.get(&600), Some(&vec!["d3".to_owned()]));
}

#[test]
fn entry_due_logic() {
    let mut entry = ArchivingEntry::new("W1", 60);
    assert!(entry.is_due(1000), "never updated means due");
    entry.mark_updated(1000);
    assert!(!entry.is_due(1060));
    assert!(entry.is_due(1061));
}

#[test]
fn instructions_survive_restart() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let backend: Arc<dyn StateBackend> = Arc::new(DirBackend::new(tmp.path()).expect("backend"));

    let store = ArchiveStore::new(Arc::clone(&backend));
    let mut schedule = std::collections::HashMap::new();
    schedule.insert(60u64, vec!["W1".to_owned()]);
    store.on_sync(schedule);

    let reloaded = ArchiveStore::new(backend);
    assert_eq!(reloaded.instructions().get(&60), Some(&vec!["W1".to_owned()]));
}

#[test]
fn memory_backend_store_starts_empty() {
    let store = ArchiveStore::new(Arc::new(MemoryBackend));
    assert!(store.instructions().is_empty());
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn catalog_rebuild_replaces_everything() {
    let store = SensorStore::new();
    store.on_sync(vec![Sensor::new("a b", "W1", "std.Number10")]);
    assert_eq!(store.len(), 1);

    store.on_sync(vec![Sensor::new("c", "W2", "std.Unicode")]);
    assert_eq!(store.len(), 1);
    assert!(store.get("a b").is_none());
    assert!(store.get("c").is_some());
}

#[test]
fn lookup_canonicalizes_tags() {
    let store = SensorStore::new();
    store.on_sync(vec![Sensor::new("temp boiler", "W1", "std.Number10")]);
    let sensor = store.get("boiler temp").expect("found under permuted tags");
    assert_eq!(sensor.fqts, "boiler temp");
    assert!(store.get("boiler").is_none());
}

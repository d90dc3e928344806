// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use chrono::TimeZone;
use tokio::sync::Notify;

use super::*;
use crate::store::backend::MemoryBackend;

fn window(start: (u8, u8, u8), stop: (u8, u8, u8)) -> SilencingWindow {
    SilencingWindow {
        start: ClockTime { day_of_week: start.0, hour: start.1, minute: start.2 },
        stop: ClockTime { day_of_week: stop.0, hour: stop.1, minute: stop.2 },
    }
}

fn spec_with_silencing(silencing: Vec<SilencingWindow>) -> PredicateSpec {
    PredicateSpec {
        predicate_id: "p1".to_owned(),
        verbose_name: "temp watch".to_owned(),
        silencing,
        configuration: serde_json::json!({"limit": 30}),
        statistic_name: "temp".to_owned(),
        group: "B".to_owned(),
        online: true,
    }
}

fn context(silencing: Vec<SilencingWindow>) -> PredicateContext {
    let events = EventStore::new(Arc::new(MemoryBackend), Arc::new(Notify::new()));
    PredicateContext::new(spec_with_silencing(silencing), events, Arc::new(Notify::new()))
}

/// Monday 2024-01-01 at the given time, in UTC (weekday = 1).
fn monday_at(hour: u32, minute: u32) -> chrono::DateTime<chrono::Utc> {
    chrono::Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).single().expect("valid time")
}

#[test]
fn window_bounds_are_inclusive() {
    // Mon 09:00 → Mon 17:00
    let w = window((1, 9, 0), (1, 17, 0));
    assert!(w.contains(1, 9, 0));
    assert!(w.contains(1, 10, 0));
    assert!(w.contains(1, 17, 0));
    assert!(!w.contains(1, 17, 1));
    assert!(!w.contains(1, 8, 59));
    assert!(!w.contains(2, 10, 0));
}

#[test]
fn silenced_event_is_suppressed() {
    // Mon 09:00 → Mon 17:00, local time Mon 10:00.
    let ctx = context(vec![window((1, 9, 0), (1, 17, 0))]);
    let during = ctx.open_event_at("temp high", Severity::Red, &monday_at(10, 0));
    assert!(during.is_none());
    assert!(ctx.open_events().is_empty(), "no event reaches the store");

    // At Mon 17:01 the same call creates and stores an event.
    let after = ctx.open_event_at("temp high", Severity::Red, &monday_at(17, 1));
    let event = after.expect("created after the window");
    assert_eq!(event.severity, Severity::Red);
    assert_eq!(event.message, "temp watch: temp high");
    assert_eq!(event.metadata.get("predicate_id").map(String::as_str), Some("p1"));
    assert_eq!(ctx.open_events().len(), 1);
}

#[test]
fn closing_an_event_marks_it_closed() {
    let ctx = context(vec![]);
    let event = ctx.open_event_at("x", Severity::Yellow, &monday_at(1, 0)).expect("open");
    ctx.close_event(&event);
    assert!(ctx.open_events().is_empty());
}

#[test]
fn spec_decodes_from_wire() {
    let spec = PredicateSpec::from_wire(&serde_json::json!({
        "predicate_id": "p7",
        "verbose_name": "fan watch",
        "statistic": "fan",
        "configuration": {"limit": 3},
        "group": "A",
        "online": false,
        "silencing": [
            {"start": {"day": 1, "hour": 9, "minute": 0}, "stop": {"day": 1, "hour": 17, "minute": 0}}
        ]
    }))
    .expect("decode");
    assert_eq!(spec.predicate_id, "p7");
    assert!(!spec.online);
    assert_eq!(spec.silencing.len(), 1);
    assert_eq!(spec.silencing[0].start, ClockTime { day_of_week: 1, hour: 9, minute: 0 });
}

#[test]
fn registry_matches_by_statistic_name() {
    let registry = PredicateRegistry::new();
    assert!(registry.try_match("temp", &serde_json::Value::Null).is_none());

    let factory: PredicateFactory = Arc::new(|_spec| Box::new(UndefinedPredicate));
    let handle = registry.register_statistic("temp", factory);
    assert!(registry.try_match("temp", &serde_json::Value::Null).is_some());
    assert!(registry.try_match("other", &serde_json::Value::Null).is_none());

    handle.cancel();
    assert!(registry.try_match("temp", &serde_json::Value::Null).is_none());
}

#[test]
fn registry_matches_by_configuration() {
    let registry = PredicateRegistry::new();
    let factory: PredicateFactory = Arc::new(|_spec| Box::new(UndefinedPredicate));
    registry.register_matcher(
        |statistic, config| statistic == "temp" && config.get("limit").is_some(),
        factory,
    );
    assert!(registry.try_match("temp", &serde_json::json!({"limit": 1})).is_some());
    assert!(registry.try_match("temp", &serde_json::json!({})).is_none());
}

#[tokio::test]
async fn predicate_state_round_trips_through_the_cache() {
    let events = EventStore::new(Arc::new(MemoryBackend), Arc::new(Notify::new()));
    let ctx = PredicateContext::new(spec_with_silencing(vec![]), Arc::clone(&events), Arc::new(Notify::new()));

    ctx.load_state();
    assert_eq!(ctx.state(), None);
    ctx.set_state(serde_json::json!({"ticks": 1}));
    ctx.store_state();

    // A fresh context for the same predicate sees the persisted state.
    let ctx2 = PredicateContext::new(spec_with_silencing(vec![]), events, Arc::new(Notify::new()));
    ctx2.load_state();
    assert_eq!(ctx2.state(), Some(serde_json::json!({"ticks": 1})));
}

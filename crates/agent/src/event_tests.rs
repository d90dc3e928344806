// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn sample_event(is_point: bool, ended_on: Option<u64>) -> Event {
    Event::new(
        Some(1000),
        ended_on,
        Severity::Red,
        is_point,
        "temp",
        "B",
        "temperature high",
        HashMap::new(),
    )
}

#[test]
fn point_events_are_born_closed() {
    assert!(sample_event(true, None).is_closed());
    assert!(!sample_event(false, None).is_closed());
    assert!(sample_event(false, Some(2000)).is_closed());
}

#[test]
fn identity_prefers_server_id() {
    let mut event = sample_event(false, None);
    let provisional = event.provisional_id.clone();
    assert_eq!(event.effective_id(), provisional);
    assert!(event.matches_id(&provisional));

    event.id = Some("srv-1".into());
    assert_eq!(event.effective_id(), "srv-1");
    assert!(event.matches_id("srv-1"));
    assert!(event.matches_id(&provisional), "provisional identity keeps matching");
    assert!(!event.matches_id("other"));
}

#[test]
fn provisional_ids_are_unique() {
    assert_ne!(sample_event(false, None).provisional_id, sample_event(false, None).provisional_id);
}

#[test]
fn wire_form_omits_unset_fields() {
    let event = sample_event(false, None);
    let wire = event.to_wire();
    assert_eq!(wire["color"], 2);
    assert_eq!(wire["alarm_type"], 0);
    assert!(wire.get("uuid").is_none());
    assert!(wire.get("ended_on").is_none());
}

#[test]
fn stored_form_round_trips_identity() {
    let mut event = sample_event(false, Some(1500));
    event.id = Some("srv-9".into());
    let restored = Event::from_wire(&event.to_stored()).expect("decode");
    assert_eq!(restored, event);
}

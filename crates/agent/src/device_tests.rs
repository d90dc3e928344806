// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn storage_level_wire_round_trip() {
    assert_eq!(StorageLevel::from_wire(StorageLevel::Permanent.to_wire()), Some(StorageLevel::Permanent));
    assert_eq!(StorageLevel::from_wire(StorageLevel::Trend.to_wire()), Some(StorageLevel::Trend));
    assert_eq!(StorageLevel::from_wire(9), None);
}

#[test]
fn environment_endpoints_differ() {
    assert!(Environment::Production.api_base_url().starts_with("https://"));
    assert!(!Environment::Production.uses_forwarded_cert());
    assert!(Environment::Staging.uses_forwarded_cert());
    assert_ne!(Environment::Production.uplink_host(), Environment::Staging.uplink_host());
}

#[test]
fn device_info_decodes() {
    let payload = serde_json::json!({
        "device_id": "dev-1",
        "verbose_name": "Boiler room",
        "facets": ["web", "mobile"],
        "culture_context": {
            "language": "en",
            "timezone": "Europe/Warsaw",
            "units": "metric"
        },
        "slave_devices": [{
            "device_id": "slave-1",
            "master_controller": "dev-1",
            "responsible_service": "rapid",
            "configuration": "cfg"
        }]
    });
    let info = DeviceInfo::from_wire(&payload).expect("decode");
    assert_eq!(info.device_id, "dev-1");
    assert_eq!(info.timezone, "Europe/Warsaw");
    assert_eq!(info.slaves.len(), 1);
    assert_eq!(info.slaves[0].device_id, "slave-1");
}

#[test]
fn device_info_without_slaves_decodes() {
    let payload = serde_json::json!({
        "device_id": "dev-2",
        "verbose_name": "x",
        "facets": [],
        "culture_context": {"language": "en", "timezone": "UTC", "units": "imperial"}
    });
    let info = DeviceInfo::from_wire(&payload).expect("decode");
    assert!(info.slaves.is_empty());
}

#[test]
fn device_info_missing_fields_is_none() {
    assert!(DeviceInfo::from_wire(&serde_json::json!({"device_id": "x"})).is_none());
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device-level basics: environment selection, storage policy and the
//! metadata the cloud reports about a device and its slaves.

use serde_json::Value as Json;

/// Environment a device certificate is issued for. Parsed out of the
/// certificate by the provisioning layer and handed to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    Production,
    Staging,
    LocalDevelopment,
}

impl Environment {
    /// Base URL of the request/response HTTP API, no trailing slash.
    pub fn api_base_url(&self) -> &'static str {
        match self {
            Self::Production => "https://api.tetherlink.io",
            Self::Staging => "http://api.staging.tetherlink.io",
            Self::LocalDevelopment => "http://http-api",
        }
    }

    /// Hostname of the framed TLS uplink.
    pub fn uplink_host(&self) -> &'static str {
        match self {
            Self::Production => "uplink.tetherlink.io",
            Self::Staging => "uplink.staging.tetherlink.io",
            Self::LocalDevelopment => "uplink",
        }
    }

    /// Staging terminates TLS upstream and forwards the client
    /// certificate in a header instead of true mutual auth.
    pub fn uses_forwarded_cert(&self) -> bool {
        !matches!(self, Self::Production)
    }
}

/// Identity of this agent, as extracted from its certificate by the
/// provisioning layer (certificate parsing is outside this crate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub environment: Environment,
}

/// How long the platform retains a pathpoint's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageLevel {
    /// Hold all values indefinitely.
    Permanent,
    /// Values at most two weeks old are kept.
    Trend,
}

impl StorageLevel {
    pub fn to_wire(self) -> u64 {
        match self {
            Self::Permanent => 0,
            Self::Trend => 1,
        }
    }

    pub fn from_wire(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(Self::Permanent),
            1 => Some(Self::Trend),
            _ => None,
        }
    }
}

/// A slave device attached to this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveDeviceInfo {
    pub device_id: String,
    pub master_controller: String,
    pub responsible_service: String,
    pub configuration: String,
}

impl SlaveDeviceInfo {
    pub fn from_wire(value: &Json) -> Option<Self> {
        Some(Self {
            device_id: value.get("device_id")?.as_str()?.to_owned(),
            master_controller: value.get("master_controller")?.as_str()?.to_owned(),
            responsible_service: value.get("responsible_service")?.as_str()?.to_owned(),
            configuration: value.get("configuration")?.as_str()?.to_owned(),
        })
    }
}

/// Device metadata as reported by `GET /v1/device`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: String,
    pub verbose_name: String,
    pub facets: Vec<String>,
    pub language: String,
    pub timezone: String,
    pub units: String,
    pub slaves: Vec<SlaveDeviceInfo>,
}

impl DeviceInfo {
    pub fn from_wire(value: &Json) -> Option<Self> {
        let culture = value.get("culture_context")?;
        Some(Self {
            device_id: value.get("device_id")?.as_str()?.to_owned(),
            verbose_name: value.get("verbose_name")?.as_str()?.to_owned(),
            facets: value
                .get("facets")?
                .as_array()?
                .iter()
                .filter_map(|f| f.as_str().map(str::to_owned))
                .collect(),
            language: culture.get("language")?.as_str()?.to_owned(),
            timezone: culture.get("timezone")?.as_str()?.to_owned(),
            units: culture.get("units")?.as_str()?.to_owned(),
            slaves: value
                .get("slave_devices")
                .and_then(Json::as_array)
                .map(|items| items.iter().filter_map(SlaveDeviceInfo::from_wire).collect())
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;

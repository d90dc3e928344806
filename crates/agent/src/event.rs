// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Alert events raised by locally hosted predicates or user code.

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::clock::now_s;

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    White,
    Yellow,
    Red,
}

impl Severity {
    pub fn to_wire(self) -> u64 {
        match self {
            Self::White => 0,
            Self::Yellow => 1,
            Self::Red => 2,
        }
    }

    pub fn from_wire(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(Self::White),
            1 => Some(Self::Yellow),
            2 => Some(Self::Red),
            _ => None,
        }
    }
}

/// A single alert event.
///
/// Identity is the server-assigned `id` once known, the locally
/// generated `provisional_id` before that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: Option<String>,
    pub provisional_id: String,
    /// Seconds since epoch.
    pub started_on: u64,
    /// Seconds since epoch; `None` while the event is open.
    pub ended_on: Option<u64>,
    pub severity: Severity,
    /// Point events carry no duration and are born closed.
    pub is_point: bool,
    pub token: String,
    pub group: String,
    pub message: String,
    pub handled_by: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl Event {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        started_on: Option<u64>,
        ended_on: Option<u64>,
        severity: Severity,
        is_point: bool,
        token: impl Into<String>,
        group: impl Into<String>,
        message: impl Into<String>,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            id: None,
            provisional_id: uuid::Uuid::new_v4().simple().to_string(),
            started_on: started_on.unwrap_or_else(now_s),
            ended_on,
            severity,
            is_point,
            token: token.into(),
            group: group.into(),
            message: message.into(),
            handled_by: None,
            metadata,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.is_point || self.ended_on.is_some()
    }

    /// The identity to refer to this event by.
    pub fn effective_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.provisional_id)
    }

    pub fn matches_id(&self, candidate: &str) -> bool {
        self.id.as_deref() == Some(candidate) || self.provisional_id == candidate
    }

    pub fn to_wire(&self) -> Json {
        let mut dct = serde_json::json!({
            "started_on": self.started_on,
            "color": self.severity.to_wire(),
            "alarm_type": if self.is_point { 1 } else { 0 },
            "token": self.token,
            "group": self.group,
            "message": self.message,
            "metadata": self.metadata,
        });
        if let Some(id) = &self.id {
            dct["uuid"] = Json::from(id.clone());
        }
        if let Some(handled_by) = &self.handled_by {
            dct["handled_by"] = Json::from(handled_by.clone());
        }
        if let Some(ended_on) = self.ended_on {
            dct["ended_on"] = Json::from(ended_on);
        }
        dct
    }

    pub fn from_wire(value: &Json) -> Option<Self> {
        let mut event = Self::new(
            value.get("started_on")?.as_u64(),
            value.get("ended_on").and_then(Json::as_u64),
            Severity::from_wire(value.get("color")?.as_u64()?)?,
            value.get("alarm_type")?.as_u64()? == 1,
            value.get("token")?.as_str()?,
            value.get("group")?.as_str()?,
            value.get("message")?.as_str()?,
            value
                .get("metadata")
                .and_then(Json::as_object)
                .map(|m| {
                    m.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_owned())))
                        .collect()
                })
                .unwrap_or_default(),
        );
        event.id = value.get("uuid").and_then(Json::as_str).map(str::to_owned);
        event.handled_by = value.get("handled_by").and_then(Json::as_str).map(str::to_owned);
        if let Some(provisional) = value.get("provisional_id").and_then(Json::as_str) {
            event.provisional_id = provisional.to_owned();
        }
        Some(event)
    }

    /// Persisted form: the wire form plus the provisional identity so an
    /// event keeps its identity across restarts.
    pub fn to_stored(&self) -> Json {
        let mut dct = self.to_wire();
        dct["provisional_id"] = Json::from(self.provisional_id.clone());
        dct
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;

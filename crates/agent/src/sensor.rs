// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sensors: named, typed views over one or more pathpoints.
//!
//! A sensor is identified by its canonical tag set (space-joined, sorted)
//! and fans reads/writes out to its constituent pathpoints through a
//! value-conversion step described by the sensor's type descriptor.

use serde_json::Value as Json;

use crate::error::{FailureKind, OperationFailure};
use crate::orders::{AdviseLevel, Disposition, Order, ReadOrder, Section, SectionHandle, WriteOrder};
use crate::value::{PathpointValue, ValueKind};

/// Canonicalize a tag set: split on spaces, sort, re-join.
/// Idempotent and invariant under permutation of the input tags.
pub fn fqtsify(tag_name: &str) -> String {
    let mut tags: Vec<&str> =
        tag_name.split(' ').filter(|t| !t.is_empty()).collect();
    tags.sort_unstable();
    tags.join(" ")
}

/// Conversion between pathpoint values and sensor values.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorType {
    Numeric(NumericType),
    Unicode,
}

/// Linear numeric conversion with rounding.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericType {
    pub precision: i32,
    pub multiplier: f64,
    pub offset: f64,
}

impl Default for NumericType {
    fn default() -> Self {
        Self { precision: 2, multiplier: 1.0, offset: 0.0 }
    }
}

impl NumericType {
    fn to_sensor(&self, value: f64) -> f64 {
        let scaled = value * self.multiplier + self.offset;
        let factor = 10f64.powi(self.precision);
        (scaled * factor).round() / factor
    }

    fn to_pathpoint(&self, value: f64) -> f64 {
        (value - self.offset) / self.multiplier
    }
}

impl SensorType {
    /// Resolve a type descriptor. Well-known names map to fixed
    /// conversions; a parameterized `Number(key=value, …)` descriptor is
    /// parsed field-wise. Anything else is the identity conversion.
    pub fn from_descriptor(type_name: &str) -> Self {
        match type_name {
            "std.Unicode" => return Self::Unicode,
            "std.Number10" => {
                return Self::Numeric(NumericType { multiplier: 0.1, ..NumericType::default() })
            }
            "std.Number100" => {
                return Self::Numeric(NumericType { multiplier: 0.01, ..NumericType::default() })
            }
            _ => {}
        }
        if let Some(args) = type_name.split_once('(').map(|(_, rest)| rest) {
            let args = args.rsplit_once(')').map(|(inner, _)| inner).unwrap_or(args);
            let mut numeric = NumericType::default();
            for part in args.split(',') {
                let Some((key, raw)) = part.split_once('=') else { continue };
                let Ok(parsed) = raw.trim().parse::<f64>() else { continue };
                match key.trim() {
                    "precision" => numeric.precision = parsed as i32,
                    "multiplier" => numeric.multiplier = parsed,
                    "offset" => numeric.offset = parsed,
                    _ => {}
                }
            }
            return Self::Numeric(numeric);
        }
        Self::Numeric(NumericType::default())
    }

    /// Combine constituent pathpoint values into the sensor value.
    pub fn pathpoint_to_sensor(
        &self,
        values: &[PathpointValue],
    ) -> Result<PathpointValue, OperationFailure> {
        let first = values.first().ok_or_else(|| OperationFailure::new(FailureKind::Invalid))?;
        match self {
            Self::Unicode => Ok(first.coerce_to(ValueKind::Unicode)?),
            Self::Numeric(numeric) => {
                let PathpointValue::F64(raw) = first.coerce_to(ValueKind::F64)? else {
                    return Err(OperationFailure::new(FailureKind::Type));
                };
                Ok(PathpointValue::F64(numeric.to_sensor(raw)))
            }
        }
    }

    /// Split a sensor value into per-pathpoint values, coerced to the
    /// constituents' declared kinds.
    pub fn sensor_to_pathpoint(
        &self,
        value: &PathpointValue,
        kinds: &[ValueKind],
    ) -> Result<Vec<PathpointValue>, OperationFailure> {
        let kind = *kinds.first().ok_or_else(|| OperationFailure::new(FailureKind::Invalid))?;
        match self {
            Self::Unicode => Ok(vec![value.coerce_to(ValueKind::Unicode)?]),
            Self::Numeric(numeric) => {
                let PathpointValue::F64(raw) = value.coerce_to(ValueKind::F64)? else {
                    return Err(OperationFailure::new(FailureKind::Type));
                };
                Ok(vec![PathpointValue::F64(numeric.to_pathpoint(raw)).coerce_to(kind)?])
            }
        }
    }
}

/// A sensor defined on this device.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    /// Canonical tag set.
    pub fqts: String,
    /// Constituent pathpoint names, tilde-separated, as reported.
    pub path: String,
    pub type_name: String,
    sensor_type: SensorType,
    pathpoint_names: Vec<String>,
}

impl Sensor {
    pub fn new(fqts: &str, path: &str, type_name: &str) -> Self {
        Self {
            fqts: fqtsify(fqts),
            path: path.to_owned(),
            type_name: type_name.to_owned(),
            sensor_type: SensorType::from_descriptor(type_name),
            pathpoint_names: path.split('~').map(str::to_owned).collect(),
        }
    }

    pub fn from_wire(value: &Json) -> Option<Self> {
        Some(Self::new(
            value.get("fqts")?.as_str()?,
            value.get("path")?.as_str()?,
            value.get("type")?.as_str()?,
        ))
    }

    pub fn pathpoints(&self) -> &[String] {
        &self.pathpoint_names
    }

    pub fn sensor_type(&self) -> &SensorType {
        &self.sensor_type
    }

    /// Build a section reading every constituent pathpoint.
    pub fn read(&self, advise: AdviseLevel) -> (Section, SectionHandle) {
        let orders = self
            .pathpoint_names
            .iter()
            .map(|name| Order::Read(ReadOrder::new(name.clone(), advise)))
            .collect();
        Section::new(orders, Disposition::Joinable)
    }

    /// Build a section writing the sensor value, fanned out over the
    /// constituents with conversion.
    pub fn write(
        &self,
        value: &PathpointValue,
        advise: AdviseLevel,
    ) -> Result<(Section, SectionHandle), OperationFailure> {
        let kinds: Vec<ValueKind> = self
            .pathpoint_names
            .iter()
            .map(|name| {
                ValueKind::of_path(name).ok_or_else(|| OperationFailure::new(FailureKind::Invalid))
            })
            .collect::<Result<_, _>>()?;
        let converted = self.sensor_type.sensor_to_pathpoint(value, &kinds)?;
        let orders = converted
            .into_iter()
            .zip(&self.pathpoint_names)
            .map(|(v, name)| Order::Write(WriteOrder::new(name.clone(), v.to_wire(), advise)))
            .collect();
        Ok(Section::new(orders, Disposition::Joinable))
    }

    /// Combine constituent readings into the sensor's value.
    pub fn combine(&self, values: &[PathpointValue]) -> Result<PathpointValue, OperationFailure> {
        self.sensor_type.pathpoint_to_sensor(values)
    }
}

/// Audit record of a sensor write, queued for cloud upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorWriteEvent {
    /// Milliseconds.
    pub timestamp_ms: u64,
    pub who: String,
    pub hr_sensor: String,
    pub hr_value: String,
    pub fqts: String,
    pub value: String,
    pub reason: String,
}

impl SensorWriteEvent {
    pub fn to_wire(&self) -> Json {
        serde_json::json!({
            "timestamp": self.timestamp_ms,
            "who": self.who,
            "hr_sensor": self.hr_sensor,
            "hr_value": self.hr_value,
            "fqts": self.fqts,
            "value": self.value,
            "reason": self.reason,
        })
    }

    pub fn from_wire(value: &Json) -> Option<Self> {
        Some(Self {
            timestamp_ms: value.get("timestamp")?.as_u64()?,
            who: value.get("who")?.as_str()?.to_owned(),
            hr_sensor: value.get("hr_sensor")?.as_str()?.to_owned(),
            hr_value: value.get("hr_value")?.as_str()?.to_owned(),
            fqts: value.get("fqts")?.as_str()?.to_owned(),
            value: value.get("value")?.as_str()?.to_owned(),
            reason: value.get("reason")?.as_str()?.to_owned(),
        })
    }
}

#[cfg(test)]
#[path = "sensor_tests.rs"]
mod tests;

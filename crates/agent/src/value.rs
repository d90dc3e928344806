// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dynamically typed pathpoint values.
//!
//! The first character of a pathpoint name declares the value type; an
//! optional `r` prefix marks a derived point whose name embeds an
//! expression over other points. Coercion to the declared type is always
//! explicit and fails with a `Type` operation failure.

use serde_json::Value as Json;

use crate::error::{FailureKind, OperationFailure};

/// Value type carried by a pathpoint, from the name's type character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// `B` — binary, 0 or 1.
    Binary,
    /// `W` — unsigned 16-bit.
    U16,
    /// `w` — signed 16-bit.
    I16,
    /// `f` — IEEE 754 single.
    F32,
    /// `d` — IEEE 754 double.
    F64,
    /// `u` — Unicode string.
    Unicode,
}

impl ValueKind {
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'B' => Some(Self::Binary),
            'W' => Some(Self::U16),
            'w' => Some(Self::I16),
            'f' => Some(Self::F32),
            'd' => Some(Self::F64),
            'u' => Some(Self::Unicode),
            _ => None,
        }
    }

    /// Resolve the kind of a pathpoint name, skipping the derived-point
    /// prefix when present.
    pub fn of_path(name: &str) -> Option<Self> {
        let mut chars = name.chars();
        let first = chars.next()?;
        if first == 'r' {
            Self::from_letter(chars.next()?)
        } else {
            Self::from_letter(first)
        }
    }
}

/// Whether the name denotes a derived (expression-backed) pathpoint.
pub fn is_derived_path(name: &str) -> bool {
    name.starts_with('r')
}

/// A pathpoint value.
#[derive(Debug, Clone, PartialEq)]
pub enum PathpointValue {
    Bool(bool),
    U16(u16),
    I16(i16),
    F32(f32),
    F64(f64),
    Str(String),
}

impl PathpointValue {
    /// Wire representation used in sample batches and order payloads.
    pub fn to_wire(&self) -> Json {
        match self {
            Self::Bool(v) => Json::from(u8::from(*v)),
            Self::U16(v) => Json::from(*v),
            Self::I16(v) => Json::from(*v),
            Self::F32(v) => Json::from(*v as f64),
            Self::F64(v) => Json::from(*v),
            Self::Str(v) => Json::from(v.clone()),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(v) => Some(f64::from(u8::from(*v))),
            Self::U16(v) => Some(f64::from(*v)),
            Self::I16(v) => Some(f64::from(*v)),
            Self::F32(v) => Some(f64::from(*v)),
            Self::F64(v) => Some(*v),
            Self::Str(v) => v.trim().parse().ok(),
        }
    }

    /// Explicitly coerce into `kind`. Integral targets clip to their
    /// range, like the rest of the platform does.
    pub fn coerce_to(&self, kind: ValueKind) -> Result<PathpointValue, OperationFailure> {
        let type_error = || OperationFailure::new(FailureKind::Type);
        match kind {
            ValueKind::Binary => {
                let n = self.as_f64().ok_or_else(type_error)?;
                Ok(Self::Bool(n != 0.0))
            }
            ValueKind::U16 => {
                let n = self.as_f64().ok_or_else(type_error)?;
                Ok(Self::U16(clip(n.round(), 0.0, 65535.0) as u16))
            }
            ValueKind::I16 => {
                let n = self.as_f64().ok_or_else(type_error)?;
                Ok(Self::I16(clip(n.round(), -32768.0, 32767.0) as i16))
            }
            ValueKind::F32 => {
                let n = self.as_f64().ok_or_else(type_error)?;
                Ok(Self::F32(n as f32))
            }
            ValueKind::F64 => Ok(Self::F64(self.as_f64().ok_or_else(type_error)?)),
            ValueKind::Unicode => match self {
                Self::Str(s) => Ok(Self::Str(s.clone())),
                other => Ok(Self::Str(other.to_wire().to_string())),
            },
        }
    }

    /// Decode a JSON value from the wire (orders, sample batches).
    pub fn from_wire(value: &Json) -> Option<Self> {
        match value {
            Json::Bool(b) => Some(Self::Bool(*b)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if (0..=65535).contains(&i) {
                        Some(Self::U16(i as u16))
                    } else if (-32768..=32767).contains(&i) {
                        Some(Self::I16(i as i16))
                    } else {
                        Some(Self::F64(i as f64))
                    }
                } else {
                    n.as_f64().map(Self::F64)
                }
            }
            Json::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }
}

fn clip(value: f64, lo: f64, hi: f64) -> f64 {
    value.max(lo).min(hi)
}

/// Stored payload of one sample: either a value or an error kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Value(PathpointValue),
    Error(FailureKind),
}

impl SampleValue {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// One `(timestamp, value | error)` record of a pathpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp_ms: u64,
    pub payload: SampleValue,
}

impl Sample {
    pub fn value(timestamp_ms: u64, value: PathpointValue) -> Self {
        Self { timestamp_ms, payload: SampleValue::Value(value) }
    }

    pub fn error(timestamp_ms: u64, kind: FailureKind) -> Self {
        Self { timestamp_ms, payload: SampleValue::Error(kind) }
    }

    /// Wire form: `[ts, value]` for readings, `[false, ts, code]` for
    /// failed operations.
    pub fn to_wire(&self) -> Json {
        match &self.payload {
            SampleValue::Value(v) => Json::Array(vec![Json::from(self.timestamp_ms), v.to_wire()]),
            SampleValue::Error(kind) => Json::Array(vec![
                Json::Bool(false),
                Json::from(self.timestamp_ms),
                Json::from(kind.as_str()),
            ]),
        }
    }

    pub fn from_wire(value: &Json) -> Option<Self> {
        let items = value.as_array()?;
        match items.as_slice() {
            [Json::Bool(false), ts, code] => Some(Self::error(
                ts.as_u64()?,
                FailureKind::from_wire(code.as_str()?)?,
            )),
            [ts, v] => Some(Self::value(ts.as_u64()?, PathpointValue::from_wire(v)?)),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "value_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// The connection to the uplink endpoint failed or was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFailed {
    /// True when the failure is attributable to the network being down
    /// (dial errors), false for protocol-level teardown.
    pub due_to_no_internet: bool,
    pub reason: String,
}

impl ConnectionFailed {
    pub fn no_internet(reason: impl Into<String>) -> Self {
        Self { due_to_no_internet: true, reason: reason.into() }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self { due_to_no_internet: false, reason: reason.into() }
    }
}

impl fmt::Display for ConnectionFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection failed: {}", self.reason)
    }
}

impl std::error::Error for ConnectionFailed {}

/// A frame on the wire could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidFrame {
    pub reason: String,
}

impl InvalidFrame {
    pub fn unknown_type(raw: u16) -> Self {
        Self { reason: format!("unrecognized frame type {raw}") }
    }

    pub fn oversized(len: usize) -> Self {
        Self { reason: format!("payload length {len} exceeds maximum") }
    }

    pub fn bad_payload(detail: &str) -> Self {
        Self { reason: format!("undecodable payload: {detail}") }
    }
}

impl fmt::Display for InvalidFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid frame: {}", self.reason)
    }
}

impl std::error::Error for InvalidFrame {}

/// Errors surfaced to uplink users through settlement futures and handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UplinkError {
    /// The link went down before (or while) the operation settled.
    Connection(ConnectionFailed),
    /// The server rejected a data-stream batch as invalid.
    DataStreamSyncFailed,
    /// A frame on the wire was undecodable.
    Invalid(InvalidFrame),
}

impl UplinkError {
    pub fn is_no_link(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl fmt::Display for UplinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => e.fmt(f),
            Self::DataStreamSyncFailed => f.write_str("data stream sync rejected by server"),
            Self::Invalid(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for UplinkError {}

impl From<ConnectionFailed> for UplinkError {
    fn from(e: ConnectionFailed) -> Self {
        Self::Connection(e)
    }
}

impl From<InvalidFrame> for UplinkError {
    fn from(e: InvalidFrame) -> Self {
        Self::Invalid(e)
    }
}

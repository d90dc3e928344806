// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error kinds shared across the agent: HTTP faults, sync faults and I/O
//! operation failures surfaced by user handlers.

use std::fmt;

use crate::clock::now_ms;

/// Synthetic status meaning "no link" — the request never reached the
/// cloud (DNS failure, refused connection, timeout).
pub const NO_LINK_STATUS: u16 = 599;

/// Why an I/O operation against a local point failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The device responded with a malformed protocol frame.
    Malformed,
    /// The device did not respond in time.
    Timeout,
    /// The device reports the point as bogus.
    Invalid,
    /// The value could not be coerced to the point's type.
    Type,
    /// No reading has been taken yet. Legal from `current` accessors,
    /// invalid as a read-handler result.
    NotRead,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::Timeout => "timeout",
            Self::Invalid => "invalid",
            Self::Type => "type",
            Self::NotRead => "not_read",
        }
    }

    /// Decode the wire error code used in sample batches.
    pub fn from_wire(code: &str) -> Option<Self> {
        match code {
            "malformed" => Some(Self::Malformed),
            "timeout" => Some(Self::Timeout),
            "invalid" => Some(Self::Invalid),
            "type" => Some(Self::Type),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a read or write against a local point, as surfaced by user
/// handlers and stored as the point's latest sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationFailure {
    pub kind: FailureKind,
    pub timestamp_ms: u64,
}

impl OperationFailure {
    pub fn new(kind: FailureKind) -> Self {
        Self { kind, timestamp_ms: now_ms() }
    }

    pub fn at(kind: FailureKind, timestamp_ms: u64) -> Self {
        Self { kind, timestamp_ms }
    }

    pub fn not_read() -> Self {
        Self::new(FailureKind::NotRead)
    }

    pub fn is_not_read(&self) -> bool {
        self.kind == FailureKind::NotRead
    }
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation failed: {} at {}", self.kind, self.timestamp_ms)
    }
}

impl std::error::Error for OperationFailure {}

/// The cloud replied with a wrong status, or did not reply at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseError {
    pub status_code: u16,
    pub status: String,
}

impl ResponseError {
    pub fn new(status_code: u16, status: impl Into<String>) -> Self {
        Self { status_code, status: status.into() }
    }

    /// The request never made it to the cloud.
    pub fn no_link(detail: impl Into<String>) -> Self {
        Self { status_code: NO_LINK_STATUS, status: detail.into() }
    }

    pub fn is_no_link(&self) -> bool {
        self.status_code == NO_LINK_STATUS
    }

    /// The batch we submitted is damaged; retrying it cannot help.
    pub fn is_clients_fault(&self) -> bool {
        self.status_code / 100 == 4
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResponseError({}, \"{}\")", self.status_code, self.status)
    }
}

impl std::error::Error for ResponseError {}

/// Sync-worker-level fault, collapsing transport differences between the
/// HTTP and uplink strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncError {
    pub no_link: bool,
    pub clients_fault: bool,
}

impl SyncError {
    pub fn no_link() -> Self {
        Self { no_link: true, clients_fault: false }
    }

    pub fn clients_fault() -> Self {
        Self { no_link: false, clients_fault: true }
    }

    pub fn server_fault() -> Self {
        Self { no_link: false, clients_fault: false }
    }
}

impl From<&ResponseError> for SyncError {
    fn from(e: &ResponseError) -> Self {
        Self { no_link: e.is_no_link(), clients_fault: e.is_clients_fault() }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.no_link {
            f.write_str("sync failed: no link")
        } else if self.clients_fault {
            f.write_str("sync failed: batch rejected")
        } else {
            f.write_str("sync failed: server fault")
        }
    }
}

impl std::error::Error for SyncError {}

/// Faults surfaced through the agent's public surface.
#[derive(Debug)]
pub enum AgentError {
    /// The agent has been closed; no further operations are accepted.
    AlreadyClosed,
    /// The subsystem backing this operation was disabled at startup.
    Unavailable(&'static str),
    /// The operation needs state that has not been attached yet.
    NotReady(String),
    /// Certificate or key material could not be used.
    InvalidCredentials(String),
    /// An HTTP exchange with the cloud failed.
    Response(ResponseError),
    /// A local I/O operation failed.
    Operation(OperationFailure),
    /// The referenced entity does not exist.
    NotFound(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyClosed => f.write_str("already closed"),
            Self::Unavailable(what) => write!(f, "support for {what} was disabled"),
            Self::NotReady(detail) => write!(f, "instance not ready: {detail}"),
            Self::InvalidCredentials(detail) => write!(f, "invalid credentials: {detail}"),
            Self::Response(e) => e.fmt(f),
            Self::Operation(e) => e.fmt(f),
            Self::NotFound(what) => write!(f, "not found: {what}"),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<ResponseError> for AgentError {
    fn from(e: ResponseError) -> Self {
        Self::Response(e)
    }
}

impl From<OperationFailure> for AgentError {
    fn from(e: OperationFailure) -> Self {
        Self::Operation(e)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

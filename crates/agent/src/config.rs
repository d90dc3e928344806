// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration: credentials, subsystem switches and sync
//! strategy selection.

use std::path::PathBuf;
use std::time::Duration;

use crate::device::DeviceIdentity;
use crate::error::AgentError;

/// Certificate or key material: a path on disk, or in-memory PEM bytes.
///
/// In-memory material is spilled to an ephemeral temp file for
/// consumers that need a path; the file is removed on close.
#[derive(Debug, Clone)]
pub enum CredentialMaterial {
    Path(PathBuf),
    Pem(Vec<u8>),
}

impl CredentialMaterial {
    /// The PEM bytes, reading the file when path-based.
    pub fn read(&self) -> Result<Vec<u8>, AgentError> {
        match self {
            Self::Pem(bytes) => Ok(bytes.clone()),
            Self::Path(path) => std::fs::read(path).map_err(|e| {
                AgentError::InvalidCredentials(format!("{}: {e}", path.display()))
            }),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self, Self::Pem(_))
    }
}

/// Which transport carries the high-rate flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Request/response HTTP only (default).
    Http,
    /// Persistent framed TLS uplink, HTTP for the rest.
    Uplink,
}

/// Per-subsystem enable switches. Everything is on by default.
#[derive(Debug, Clone, Copy)]
pub struct SubsystemFlags {
    pub orders: bool,
    pub pathpoints: bool,
    pub blobs: bool,
    pub macros: bool,
    pub predicates: bool,
    pub archives: bool,
    pub audit: bool,
}

impl Default for SubsystemFlags {
    fn default() -> Self {
        Self {
            orders: true,
            pathpoints: true,
            blobs: true,
            macros: true,
            predicates: true,
            archives: true,
            audit: true,
        }
    }
}

/// Everything an [`crate::agent::Agent`] needs to start.
pub struct AgentConfig {
    pub identity: DeviceIdentity,
    pub certificate: CredentialMaterial,
    pub private_key: CredentialMaterial,
    /// Trust anchors for the uplink: device CA ∥ root CA, PEM.
    pub ca_chain: Vec<u8>,
    pub flags: SubsystemFlags,
    pub strategy: SyncStrategy,
    /// How long a downloaded metadata entry stays fresh.
    pub metadata_ttl: Duration,
    /// When false, workers start idle until `continue_boot` is called —
    /// gives the embedder a moment to define its pathpoints.
    pub continue_boot: bool,
    /// Base URL override for the HTTP API (tests, nonstandard sites).
    pub api_base_url: Option<String>,
}

impl AgentConfig {
    pub fn new(
        identity: DeviceIdentity,
        certificate: CredentialMaterial,
        private_key: CredentialMaterial,
        ca_chain: Vec<u8>,
    ) -> Self {
        Self {
            identity,
            certificate,
            private_key,
            ca_chain,
            flags: SubsystemFlags::default(),
            strategy: SyncStrategy::Http,
            metadata_ttl: Duration::from_secs(60),
            continue_boot: true,
            api_base_url: None,
        }
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.identity.device_id.is_empty() {
            return Err(AgentError::InvalidCredentials("empty device id".to_owned()));
        }
        if !self.flags.orders && !self.flags.pathpoints && !self.flags.predicates {
            // Nothing would ever run; almost certainly a misconfiguration.
            return Err(AgentError::NotReady(
                "orders, pathpoints and predicates are all disabled".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

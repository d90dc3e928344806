// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sync strategy: how sample batches, log batches and (optionally)
//! server-pushed orders travel between the agent and the cloud. Two
//! implementations exist — plain HTTP and the persistent uplink.

pub mod http;
pub mod uplink;

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::error::SyncError;

pub use http::HttpSyncWorker;
pub use uplink::{spawn_order_pump, UplinkSyncWorker};

/// Transport strategy for the high-rate flows.
#[async_trait]
pub trait SyncWorker: Send + Sync {
    /// Deliver a pathpoint-sample batch and wait for settlement.
    async fn sync_pathpoints(&self, batch: &Json) -> Result<(), SyncError>;

    /// Deliver a log batch.
    async fn sync_logs(&self, batch: &Json) -> Result<(), SyncError>;

    /// When true, orders are pushed over the uplink and the communicator
    /// must not poll the HTTP orders endpoint.
    fn has_async_orders(&self) -> bool;
}

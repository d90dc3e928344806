// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent-uplink sync strategy.
//!
//! Sample batches travel as settled `DATA_STREAM` frames, logs as
//! fire-and-forget `LOGS` frames. Server-pushed `ORDER` frames become
//! sections on the executor queue; the frame is acknowledged only after
//! the last produced section's future resolves.

use async_trait::async_trait;
use serde_json::Value as Json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tether_uplink::{IncomingOrder, UplinkError, UplinkHandle};

use crate::error::SyncError;
use crate::orders::{sections_from_wire, Section};
use crate::sync::SyncWorker;

pub struct UplinkSyncWorker {
    handle: UplinkHandle,
}

impl UplinkSyncWorker {
    pub fn new(handle: UplinkHandle) -> Self {
        Self { handle }
    }
}

fn map_err(e: UplinkError) -> SyncError {
    match e {
        UplinkError::Connection(_) => SyncError::no_link(),
        // The server judged the batch itself invalid; retrying the same
        // bytes cannot succeed.
        UplinkError::DataStreamSyncFailed => SyncError::clients_fault(),
        UplinkError::Invalid(_) => SyncError::clients_fault(),
    }
}

#[async_trait]
impl SyncWorker for UplinkSyncWorker {
    async fn sync_pathpoints(&self, batch: &Json) -> Result<(), SyncError> {
        self.handle.sync_pathpoints(batch).await.map_err(map_err)
    }

    async fn sync_logs(&self, batch: &Json) -> Result<(), SyncError> {
        self.handle.stream_logs(batch).await.map_err(map_err)
    }

    fn has_async_orders(&self) -> bool {
        true
    }
}

/// Forward server-pushed orders to the executor queue.
///
/// Each `ORDER` frame decodes into sections which are enqueued in order.
/// A task per frame waits for the last section's future and then settles
/// the frame's tid; undecodable frames settle negatively at once.
pub fn spawn_order_pump(
    mut order_rx: mpsc::Receiver<IncomingOrder>,
    section_tx: mpsc::UnboundedSender<Section>,
    handle: UplinkHandle,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let incoming = tokio::select! {
                _ = cancel.cancelled() => break,
                incoming = order_rx.recv() => match incoming {
                    Some(incoming) => incoming,
                    None => break,
                },
            };
            let tid = incoming.tid;
            let sections = sections_from_wire(&incoming.payload);
            if sections.is_empty() && !incoming.payload.is_array() {
                tracing::warn!(tid, "order frame with undecodable payload");
                handle.settle_order(tid, false).await;
                continue;
            }

            let mut handles = Vec::with_capacity(sections.len());
            for (section, section_handle) in sections {
                handles.push(section_handle);
                if section_tx.send(section).is_err() {
                    // Executor is gone; the agent is shutting down.
                    handle.settle_order(tid, false).await;
                    return;
                }
            }

            let settle = handle.clone();
            tokio::spawn(async move {
                for mut section_handle in handles {
                    section_handle.wait().await;
                }
                settle.settle_order(tid, true).await;
            });
        }
    });
}

#[cfg(test)]
#[path = "uplink_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The order executor: drains sections off the queue, coalesces
//! joinable neighbours, dispatches per-order I/O to user handlers and
//! applies the retry policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentHooks;
use crate::api::CloudApi;
use crate::clock::now_ms;
use crate::device::StorageLevel;
use crate::orders::{Disposition, Order, ReadOrder, Section, SysctlOrder, WriteOrder};
use crate::pathpoint::{Pathpoint, PathpointMap};
use crate::store::blobs::BlobStore;
use crate::store::pathpoints::SampleStore;
use crate::value::{is_derived_path, PathpointValue, Sample};

/// Attempts made to deliver a message-order completion beacon.
const MESSAGE_BEACON_ATTEMPTS: u32 = 6;

/// Shared dependencies of the executor.
pub struct ExecutorCtx {
    pub pathpoints: Arc<PathpointMap>,
    pub samples: Arc<SampleStore>,
    pub api: Arc<CloudApi>,
    pub hooks: Arc<dyn AgentHooks>,
    pub blobs: Arc<BlobStore>,
    pub blob_resync: Arc<AtomicBool>,
    pub signal: Arc<Notify>,
}

/// The order executor worker.
pub struct OrderExecutor {
    queue: mpsc::UnboundedReceiver<Section>,
    /// A section peeked off the queue that must not join the current one.
    peeked: Option<Section>,
    ctx: Arc<ExecutorCtx>,
    cancel: CancellationToken,
}

impl OrderExecutor {
    pub fn new(
        queue: mpsc::UnboundedReceiver<Section>,
        ctx: Arc<ExecutorCtx>,
        cancel: CancellationToken,
    ) -> Self {
        Self { queue, peeked: None, ctx, cancel }
    }

    pub async fn run(mut self) {
        loop {
            let section = match self.peeked.take() {
                Some(section) => section,
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        section = self.queue.recv() => match section {
                            Some(section) => section,
                            None => break,
                        },
                    }
                }
            };
            let section = self.coalesce(section);
            self.execute_section(section).await;
        }
    }

    /// Concatenate directly queued joinable sections onto a joinable
    /// head. Never joins across a cannot-join boundary: the offending
    /// section is parked for the next iteration.
    fn coalesce(&mut self, mut section: Section) -> Section {
        while section.is_joinable() {
            match self.queue.try_recv() {
                Ok(next) if next.is_joinable() => section.absorb(next),
                Ok(next) => {
                    self.peeked = Some(next);
                    break;
                }
                Err(_) => break,
            }
        }
        section
    }

    async fn execute_section(&mut self, mut section: Section) {
        if section.disposition == Disposition::CannotJoin {
            // The serial loop guarantees every earlier section's future
            // has resolved; the hook extends the drain to embedder-side
            // dispatch.
            self.ctx.hooks.sync_sections(self.cancel.is_cancelled()).await;
        }
        if self.cancel.is_cancelled() || section.is_cancelled() {
            section.mark_done();
            return;
        }
        if self.ctx.hooks.execute_section(&section).await {
            section.mark_done();
            return;
        }

        let started = Instant::now();
        let dwell = section.max_wait();

        let mut orders = std::mem::take(&mut section.orders);
        while !orders.is_empty() && !self.cancel.is_cancelled() {
            orders = self.process_orders(orders).await;
        }

        if let Some(dwell) = dwell {
            let elapsed = started.elapsed();
            if elapsed < dwell {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(dwell - elapsed) => {}
                }
            }
        }
        section.mark_done();
    }

    /// Run one pass over the orders; returns those to retry.
    async fn process_orders(&self, orders: Vec<Order>) -> Vec<Order> {
        let mut in_flight: Vec<(Order, JoinHandle<bool>)> = Vec::new();
        for order in self.expand_derived(orders) {
            match order {
                Order::Read(read) => {
                    if let Some(task) = self.dispatch_read(&read) {
                        in_flight.push((Order::Read(read), task));
                    }
                }
                Order::Write(write) => {
                    if let Some(task) = self.dispatch_write(&write) {
                        in_flight.push((Order::Write(write), task));
                    }
                }
                Order::Message(message) => {
                    let api = Arc::clone(&self.ctx.api);
                    let uuid = message.uuid.clone();
                    in_flight.push((
                        Order::Message(message),
                        tokio::spawn(async move {
                            for _ in 0..MESSAGE_BEACON_ATTEMPTS {
                                match api
                                    .post_empty(&format!("/v1/device/orders/message/{uuid}"))
                                    .await
                                {
                                    Ok(_) => return true,
                                    Err(e) => {
                                        tracing::debug!(uuid = %uuid, err = %e, "message beacon failed");
                                    }
                                }
                            }
                            false
                        }),
                    ));
                }
                Order::Sysctl(sysctl) => self.execute_sysctl(&sysctl).await,
                Order::Wait(_) => {}
            }
        }

        let mut to_retry = Vec::new();
        for (order, task) in in_flight {
            let succeeded = task.await.unwrap_or_else(|e| {
                tracing::error!(err = %e, "order task failed, assuming it went through");
                true
            });
            if succeeded {
                continue;
            }
            match order {
                Order::Read(mut read) => {
                    if read.fail() {
                        to_retry.push(Order::Read(read));
                    }
                }
                Order::Write(mut write) => {
                    if write.fail() {
                        to_retry.push(Order::Write(write));
                    }
                }
                // Message beacons exhaust their attempts inline.
                _ => {}
            }
        }
        to_retry
    }

    /// Replace derived-point orders with their expansion: reads fan out
    /// to the constituents, writes are no-ops.
    fn expand_derived(&self, orders: Vec<Order>) -> Vec<Order> {
        let mut out = Vec::with_capacity(orders.len());
        for order in orders {
            match order {
                Order::Read(read) if is_derived_path(&read.pathpoint) => {
                    match self.ctx.pathpoints.get_or_create(&read.pathpoint, StorageLevel::Trend) {
                        Ok(point) => {
                            if let Some(spec) = point.derived() {
                                for constituent in &spec.constituents {
                                    out.push(Order::Read(ReadOrder::new(
                                        constituent.clone(),
                                        read.advise,
                                    )));
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(path = %read.pathpoint, err = %e, "undecodable derived read");
                        }
                    }
                }
                Order::Write(write) if is_derived_path(&write.pathpoint) => {
                    tracing::debug!(path = %write.pathpoint, "write to derived point is a no-op");
                }
                other => out.push(other),
            }
        }
        out
    }

    fn lookup(&self, name: &str) -> Option<Arc<Pathpoint>> {
        let point = match self.ctx.pathpoints.get(name) {
            Some(point) => point,
            None => match self.ctx.pathpoints.get_or_create(name, StorageLevel::Trend) {
                Ok(point) => point,
                Err(e) => {
                    tracing::warn!(path = name, err = %e, "order references a bad pathpoint name");
                    return None;
                }
            },
        };
        if point.handler().is_none() {
            if let Some(handler) = self.ctx.hooks.provide_unknown_pathpoint(name) {
                point.set_handler(handler);
            }
        }
        Some(point)
    }

    /// Start a read on its own task. `None` when the order is dropped
    /// (unknown point, no handler, throttled).
    fn dispatch_read(&self, read: &ReadOrder) -> Option<JoinHandle<bool>> {
        let point = self.lookup(&read.pathpoint)?;
        let Some(handler) = point.handler() else {
            tracing::debug!(path = %read.pathpoint, "no handler for read, skipping");
            return None;
        };
        if !point.try_begin_read() {
            return None;
        }
        let advise = read.advise;
        let samples = Arc::clone(&self.ctx.samples);
        Some(tokio::spawn(async move {
            let result = handler.on_read(advise).await;
            let ts = now_ms();
            match result {
                Ok(value) => {
                    point.set_current(Sample::value(ts, value.clone()));
                    samples.on_new_data(point.name(), Sample::value(ts, value));
                    true
                }
                Err(failure) if failure.is_not_read() => {
                    tracing::error!(
                        path = %point.name(),
                        "read handler returned a not-read failure, which is invalid; dropping"
                    );
                    true
                }
                Err(failure) => {
                    point.set_current(Sample::error(ts, failure.kind));
                    samples.on_new_data(point.name(), Sample::error(ts, failure.kind));
                    false
                }
            }
        }))
    }

    /// Start a write on its own task. `None` when the order is dropped
    /// (stale, unknown point, no handler, uncoercible value).
    fn dispatch_write(&self, write: &WriteOrder) -> Option<JoinHandle<bool>> {
        if !write.is_fresh() {
            tracing::debug!(path = %write.pathpoint, "write went stale, skipping");
            return None;
        }
        let point = self.lookup(&write.pathpoint)?;
        let Some(handler) = point.handler() else {
            tracing::debug!(path = %write.pathpoint, "no handler for write, skipping");
            return None;
        };
        let value = PathpointValue::from_wire(&write.value)
            .and_then(|v| v.coerce_to(point.kind()).ok());
        let Some(value) = value else {
            tracing::warn!(path = %write.pathpoint, "value does not coerce to the point's type, dropping write");
            return None;
        };
        let advise = write.advise;
        Some(tokio::spawn(async move {
            match handler.on_write(value, advise).await {
                Ok(()) => true,
                Err(failure) => {
                    tracing::warn!(path = %point.name(), err = %failure, "write failed");
                    false
                }
            }
        }))
    }

    async fn execute_sysctl(&self, sysctl: &SysctlOrder) {
        match sysctl.op_type.as_str() {
            "baob-updated" | "baob-created" => {
                self.ctx.blob_resync.store(true, Ordering::Release);
                self.ctx.signal.notify_one();
            }
            "baob-deleted" => {
                if !self.ctx.blobs.delete(&sysctl.op_args) {
                    tracing::debug!(key = %sysctl.op_args, "blob to delete was not present");
                }
            }
            _ => {
                if !self.ctx.hooks.execute_sysctl(&sysctl.op_type, &sysctl.op_args).await {
                    tracing::warn!(op = %sysctl.op_type, "unrecognized sysctl operation");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;

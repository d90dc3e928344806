// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orders and sections — the unit of work fed to the order executor.
//!
//! A section is a batch of orders with a join disposition and a shared
//! completion future. Joinable sections may be concatenated by the
//! executor; a cannot-join section demands that everything enqueued
//! before it has fully settled first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as Json;
use tokio::sync::watch;

use crate::clock::now_ms;

/// How hard the device should try to execute an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdviseLevel {
    /// Best-effort.
    Advise,
    /// Persistent retry, up to stalling the pipeline.
    Force,
}

impl AdviseLevel {
    pub fn from_wire(raw: u64) -> Self {
        if raw == 0 { Self::Advise } else { Self::Force }
    }

    pub fn to_wire(self) -> u64 {
        match self {
            Self::Advise => 0,
            Self::Force => 1,
        }
    }
}

/// Order to read a pathpoint.
#[derive(Debug, Clone)]
pub struct ReadOrder {
    pub pathpoint: String,
    pub advise: AdviseLevel,
    pub retries_left: u32,
}

impl ReadOrder {
    pub fn new(pathpoint: impl Into<String>, advise: AdviseLevel) -> Self {
        let retries_left = match advise {
            AdviseLevel::Force => 20,
            AdviseLevel::Advise => 3,
        };
        Self { pathpoint: pathpoint.into(), advise, retries_left }
    }

    /// Record one failed attempt; true when the order should re-queue.
    pub fn fail(&mut self) -> bool {
        self.retries_left = self.retries_left.saturating_sub(1);
        self.retries_left > 0
    }
}

/// Order to write a value to a pathpoint.
#[derive(Debug, Clone)]
pub struct WriteOrder {
    pub pathpoint: String,
    pub value: Json,
    pub advise: AdviseLevel,
    /// Past this wall-clock instant the write is dropped unexecuted.
    pub stale_after_ms: Option<u64>,
    pub retries_left: u32,
}

impl WriteOrder {
    pub fn new(pathpoint: impl Into<String>, value: Json, advise: AdviseLevel) -> Self {
        let retries_left = match advise {
            AdviseLevel::Force => 10,
            AdviseLevel::Advise => 1,
        };
        Self { pathpoint: pathpoint.into(), value, advise, stale_after_ms: None, retries_left }
    }

    pub fn stale_after(mut self, deadline_ms: u64) -> Self {
        self.stale_after_ms = Some(deadline_ms);
        self
    }

    /// Whether the write is still worth executing.
    pub fn is_fresh(&self) -> bool {
        match self.stale_after_ms {
            Some(deadline) => deadline > now_ms(),
            None => true,
        }
    }

    /// Record one failed attempt; true when the order should re-queue.
    pub fn fail(&mut self) -> bool {
        self.retries_left = self.retries_left.saturating_sub(1);
        self.retries_left > 0
    }
}

/// Order to post a completion beacon for a server-side message.
#[derive(Debug, Clone)]
pub struct MessageOrder {
    pub uuid: String,
}

/// Order contributing a minimum dwell to its section.
#[derive(Debug, Clone, Copy)]
pub struct WaitOrder {
    pub seconds: f64,
}

/// System-control order dispatched to the agent's sysctl handler.
#[derive(Debug, Clone)]
pub struct SysctlOrder {
    pub op_type: String,
    pub op_args: String,
}

/// A single order.
#[derive(Debug, Clone)]
pub enum Order {
    Read(ReadOrder),
    Write(WriteOrder),
    Wait(WaitOrder),
    Message(MessageOrder),
    Sysctl(SysctlOrder),
}

impl Order {
    /// Decode one order from its wire form. Unknown types yield `None`
    /// and are skipped by the section decoder.
    pub fn from_wire(value: &Json) -> Option<Order> {
        let order_type = value.get("type")?.as_str()?;
        match order_type {
            "read" => Some(Order::Read(ReadOrder::new(
                value.get("path")?.as_str()?,
                AdviseLevel::from_wire(value.get("advise").and_then(Json::as_u64).unwrap_or(0)),
            ))),
            "write" => {
                let mut order = WriteOrder::new(
                    value.get("path")?.as_str()?,
                    value.get("value")?.clone(),
                    AdviseLevel::from_wire(value.get("advise").and_then(Json::as_u64).unwrap_or(0)),
                );
                if let Some(stale_after_s) = value.get("stale_after").and_then(Json::as_f64) {
                    order.stale_after_ms = Some((stale_after_s * 1000.0) as u64);
                }
                Some(Order::Write(order))
            }
            "wait" => Some(Order::Wait(WaitOrder { seconds: value.get("time")?.as_f64()? })),
            "message" => {
                Some(Order::Message(MessageOrder { uuid: value.get("uuid")?.as_str()?.to_owned() }))
            }
            "sysctl" => Some(Order::Sysctl(SysctlOrder {
                op_type: value.get("op_type")?.as_str()?.to_owned(),
                op_args: value.get("op_args").and_then(Json::as_str).unwrap_or("").to_owned(),
            })),
            _ => None,
        }
    }
}

/// Whether a section tolerates being concatenated with its neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Joinable,
    CannotJoin,
}

impl Disposition {
    pub fn from_wire(raw: u64) -> Self {
        if raw == 0 { Self::Joinable } else { Self::CannotJoin }
    }
}

/// Completion/cancellation handle for an enqueued section.
///
/// Joined sections share completion: every handle resolves when the
/// merged unit finishes, and cancelling any handle cancels the unit.
#[derive(Debug, Clone)]
pub struct SectionHandle {
    done_rx: watch::Receiver<bool>,
    cancel: Arc<AtomicBool>,
}

impl SectionHandle {
    /// Mark the section cancelled. Effective only before execution
    /// starts; the executor then just completes the future.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        *self.done_rx.borrow()
    }

    /// Wait until the section's future resolves. Also returns if the
    /// executor dropped the section (agent shutdown).
    pub async fn wait(&mut self) {
        loop {
            if *self.done_rx.borrow_and_update() {
                return;
            }
            if self.done_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// A batch of orders executed as one unit.
#[derive(Debug)]
pub struct Section {
    pub orders: Vec<Order>,
    pub disposition: Disposition,
    done_txs: Vec<watch::Sender<bool>>,
    cancel_flags: Vec<Arc<AtomicBool>>,
}

impl Section {
    pub fn new(orders: Vec<Order>, disposition: Disposition) -> (Self, SectionHandle) {
        let (done_tx, done_rx) = watch::channel(false);
        let cancel = Arc::new(AtomicBool::new(false));
        let section = Self {
            orders,
            disposition,
            done_txs: vec![done_tx],
            cancel_flags: vec![Arc::clone(&cancel)],
        };
        (section, SectionHandle { done_rx, cancel })
    }

    pub fn empty() -> (Self, SectionHandle) {
        Self::new(Vec::new(), Disposition::Joinable)
    }

    pub fn push(&mut self, order: Order) {
        self.orders.push(order);
    }

    pub fn has_orders(&self) -> bool {
        !self.orders.is_empty()
    }

    pub fn is_joinable(&self) -> bool {
        self.disposition == Disposition::Joinable
    }

    /// Cancelled when any of the merged handles asked for it.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_flags.iter().any(|flag| flag.load(Ordering::Acquire))
    }

    /// Concatenate another section into this one: orders append, the
    /// futures merge into one composite future.
    pub fn absorb(&mut self, other: Section) {
        self.orders.extend(other.orders);
        self.done_txs.extend(other.done_txs);
        self.cancel_flags.extend(other.cancel_flags);
    }

    /// The largest wait contributed by any `Wait` order, as the
    /// section's minimum dwell.
    pub fn max_wait(&self) -> Option<Duration> {
        self.orders
            .iter()
            .filter_map(|order| match order {
                Order::Wait(w) => Some(w.seconds),
                _ => None,
            })
            .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))))
            .map(Duration::from_secs_f64)
    }

    /// Resolve every merged completion future.
    pub fn mark_done(self) {
        for tx in &self.done_txs {
            let _ = tx.send(true);
        }
    }

    /// Decode a section from its wire form.
    pub fn from_wire(value: &Json) -> Option<(Self, SectionHandle)> {
        let orders = value
            .get("orders")?
            .as_array()?
            .iter()
            .filter_map(Order::from_wire)
            .collect();
        let disposition =
            Disposition::from_wire(value.get("disposition").and_then(Json::as_u64).unwrap_or(0));
        Some(Self::new(orders, disposition))
    }
}

/// Decode a list of sections, skipping undecodable entries.
pub fn sections_from_wire(value: &Json) -> Vec<(Section, SectionHandle)> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(Section::from_wire).collect())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "orders_tests.rs"]
mod tests;

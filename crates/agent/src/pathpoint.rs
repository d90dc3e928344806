// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local I/O points and the registry that materializes them on first
//! reference — from user code, from an incoming order or from a
//! server-supplied list. Points are never destroyed while the agent runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::device::StorageLevel;
use crate::error::{AgentError, OperationFailure};
use crate::orders::{AdviseLevel, Order, ReadOrder, Section, SectionHandle, WriteOrder};
use crate::reparse;
use crate::value::{is_derived_path, PathpointValue, Sample, ValueKind};

/// User-supplied I/O driver for a pathpoint.
///
/// Handlers run on their own task, so they may block on device I/O
/// without stalling the executor. Returning a `NotRead` failure from
/// `on_read` is invalid and gets dropped.
#[async_trait]
pub trait PathpointHandler: Send + Sync {
    async fn on_read(&self, advise: AdviseLevel) -> Result<PathpointValue, OperationFailure>;

    async fn on_write(
        &self,
        value: PathpointValue,
        advise: AdviseLevel,
    ) -> Result<(), OperationFailure>;
}

/// Expression behind a derived pathpoint.
#[derive(Debug, Clone)]
pub struct DerivedSpec {
    pub expression: String,
    pub constituents: Vec<String>,
}

struct PathpointState {
    storage_level: StorageLevel,
    read_no_often_than: Option<Duration>,
    last_read_started: Option<Instant>,
    current: Option<Sample>,
    handler: Option<Arc<dyn PathpointHandler>>,
}

/// One local I/O point.
pub struct Pathpoint {
    name: String,
    kind: ValueKind,
    derived: Option<DerivedSpec>,
    state: Mutex<PathpointState>,
}

impl std::fmt::Debug for Pathpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pathpoint")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("derived", &self.derived)
            .finish()
    }
}

impl Pathpoint {
    pub fn new(name: impl Into<String>, storage_level: StorageLevel) -> Result<Self, AgentError> {
        let name = name.into();
        let kind = ValueKind::of_path(&name)
            .ok_or_else(|| AgentError::NotReady(format!("pathpoint name {name:?} has no type")))?;
        let derived = if is_derived_path(&name) {
            let (expression, constituents) = reparse::parse(&name[2..])
                .map_err(|e| AgentError::NotReady(format!("derived pathpoint {name:?}: {e}")))?;
            Some(DerivedSpec { expression, constituents })
        } else {
            None
        };
        Ok(Self {
            name,
            kind,
            derived,
            state: Mutex::new(PathpointState {
                storage_level,
                read_no_often_than: None,
                last_read_started: None,
                current: None,
                handler: None,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn derived(&self) -> Option<&DerivedSpec> {
        self.derived.as_ref()
    }

    pub fn storage_level(&self) -> StorageLevel {
        self.state.lock().storage_level
    }

    pub fn set_storage_level(&self, level: StorageLevel) {
        self.state.lock().storage_level = level;
    }

    pub fn handler(&self) -> Option<Arc<dyn PathpointHandler>> {
        self.state.lock().handler.clone()
    }

    pub fn set_handler(&self, handler: Arc<dyn PathpointHandler>) {
        self.state.lock().handler = Some(handler);
    }

    /// Minimum spacing between handler read invocations.
    pub fn set_read_throttle(&self, interval: Option<Duration>) {
        self.state.lock().read_no_often_than = interval;
    }

    /// Whether a read may start now; records the attempt when allowed.
    /// Two reads spaced closer than the throttle execute at most one
    /// handler invocation.
    pub fn try_begin_read(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        if let (Some(interval), Some(last)) = (state.read_no_often_than, state.last_read_started) {
            if now.duration_since(last) < interval {
                return false;
            }
        }
        state.last_read_started = Some(now);
        true
    }

    /// Latest locally cached sample.
    pub fn current(&self) -> Option<Sample> {
        self.state.lock().current.clone()
    }

    /// Cache a new sample; stale timestamps are ignored, keeping the
    /// per-point series strictly monotonic.
    pub fn set_current(&self, sample: Sample) -> bool {
        let mut state = self.state.lock();
        if let Some(existing) = &state.current {
            if sample.timestamp_ms <= existing.timestamp_ms {
                return false;
            }
        }
        state.current = Some(sample);
        true
    }

    /// Build a section that refreshes this point. Reading a derived point
    /// reads exactly its constituents.
    pub fn read(&self, advise: AdviseLevel) -> (Section, SectionHandle) {
        let orders = match &self.derived {
            Some(spec) => spec
                .constituents
                .iter()
                .map(|name| Order::Read(ReadOrder::new(name.clone(), advise)))
                .collect(),
            None => vec![Order::Read(ReadOrder::new(self.name.clone(), advise))],
        };
        Section::new(orders, crate::orders::Disposition::Joinable)
    }

    /// Build a section that writes this point. Writing a derived point
    /// is a no-op section.
    pub fn write(
        &self,
        value: PathpointValue,
        advise: AdviseLevel,
        stale_after_ms: Option<u64>,
    ) -> (Section, SectionHandle) {
        if self.derived.is_some() {
            return Section::empty();
        }
        let mut order = WriteOrder::new(self.name.clone(), value.to_wire(), advise);
        order.stale_after_ms = stale_after_ms;
        Section::new(vec![Order::Write(order)], crate::orders::Disposition::Joinable)
    }
}

struct MapState {
    points: IndexMap<String, Arc<Pathpoint>>,
    dirty: bool,
}

/// Registry of materialized pathpoints with dirty tracking for catalog
/// reconciliation. Derived points are built on the fly and never stored;
/// their constituents are materialized instead.
pub struct PathpointMap {
    state: Mutex<MapState>,
}

impl PathpointMap {
    pub fn new() -> Self {
        Self { state: Mutex::new(MapState { points: IndexMap::new(), dirty: false }) }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Pathpoint>> {
        self.state.lock().points.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().points.is_empty()
    }

    /// Look up a point, materializing it on first reference.
    pub fn get_or_create(
        &self,
        name: &str,
        storage_level: StorageLevel,
    ) -> Result<Arc<Pathpoint>, AgentError> {
        if is_derived_path(name) {
            let point = Arc::new(Pathpoint::new(name, storage_level)?);
            if let Some(spec) = point.derived() {
                for constituent in spec.constituents.clone() {
                    self.get_or_create(&constituent, storage_level)?;
                }
            }
            return Ok(point);
        }
        if let Some(existing) = self.get(name) {
            return Ok(existing);
        }
        let point = Arc::new(Pathpoint::new(name, storage_level)?);
        self.insert(Arc::clone(&point));
        Ok(point)
    }

    /// Register a point. Derived names are not registered. Signals the
    /// catalog as dirty when a new name appears.
    pub fn insert(&self, point: Arc<Pathpoint>) {
        if point.derived().is_some() {
            return;
        }
        let mut state = self.state.lock();
        if !state.points.contains_key(point.name()) {
            state.points.insert(point.name().to_owned(), point);
            state.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Snapshot the catalog shape for reconciliation, clearing the dirty
    /// flag. Returns `None` when nothing changed since the last snapshot.
    pub fn take_dirty_shape(&self) -> Option<Vec<(String, StorageLevel)>> {
        let mut state = self.state.lock();
        if !state.dirty {
            return None;
        }
        state.dirty = false;
        Some(
            state
                .points
                .values()
                .map(|p| (p.name().to_owned(), p.storage_level()))
                .collect(),
        )
    }

    /// Re-mark the catalog dirty, e.g. after a failed reconciliation.
    pub fn mark_dirty(&self) {
        self.state.lock().dirty = true;
    }

    pub fn all(&self) -> Vec<Arc<Pathpoint>> {
        self.state.lock().points.values().cloned().collect()
    }
}

impl Default for PathpointMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "pathpoint_tests.rs"]
mod tests;

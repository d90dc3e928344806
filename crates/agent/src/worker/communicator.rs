// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The communicator: one periodic pass reconciling every data domain
//! with the cloud — samples out, catalog shape, sensors, predicates,
//! blobs, audit, orders in, predicate ticks, events out, checkpoints.
//!
//! The pass interval is interruptible: stores signal `data_to_update`
//! whenever the pending-sync picture changes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as Json;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentHooks;
use crate::api::{CloudApi, BLOB_VERSION_HEADER};
use crate::config::SubsystemFlags;
use crate::device::StorageLevel;
use crate::orders::{sections_from_wire, Section};
use crate::pathpoint::PathpointMap;
use crate::predicate::{
    Predicate, PredicateContext, PredicateRegistry, PredicateSpec, UndefinedPredicate,
};
use crate::sensor::Sensor;
use crate::store::audit::AuditStore;
use crate::store::blobs::BlobStore;
use crate::store::events::EventStore;
use crate::store::pathpoints::SampleStore;
use crate::store::sensors::SensorStore;
use crate::sync::SyncWorker;

/// Cadence of the communicator's domains.
#[derive(Debug, Clone)]
pub struct CommunicatorConfig {
    pub pass_interval: Duration,
    pub sensors_interval: Duration,
    pub predicates_interval: Duration,
    pub blobs_interval: Duration,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            pass_interval: Duration::from_secs(60),
            sensors_interval: Duration::from_secs(300),
            predicates_interval: Duration::from_secs(300),
            blobs_interval: Duration::from_secs(3600),
        }
    }
}

/// Shared dependencies of the communicator.
pub struct CommunicatorCtx {
    pub api: Arc<CloudApi>,
    pub sync_worker: Arc<dyn SyncWorker>,
    pub samples: Arc<SampleStore>,
    pub events: Arc<EventStore>,
    pub audit: Arc<AuditStore>,
    pub sensors: Arc<SensorStore>,
    pub blobs: Arc<BlobStore>,
    pub pathpoints: Arc<PathpointMap>,
    pub registry: Arc<PredicateRegistry>,
    pub hooks: Arc<dyn AgentHooks>,
    pub section_tx: mpsc::UnboundedSender<Section>,
    pub signal: Arc<Notify>,
    pub blob_resync: Arc<AtomicBool>,
    pub allow_sync: Arc<AtomicBool>,
    pub flags: SubsystemFlags,
}

struct PredicateInstance {
    ctx: PredicateContext,
    inner: Box<dyn Predicate>,
    /// Awaiting a registry match; re-checked every tick.
    undefined: bool,
}

/// The communicator worker.
pub struct Communicator {
    ctx: Arc<CommunicatorCtx>,
    config: CommunicatorConfig,
    cancel: CancellationToken,
    ready_tx: watch::Sender<bool>,
    predicates: HashMap<String, PredicateInstance>,
    last_sensors: Option<Instant>,
    last_predicates: Option<Instant>,
    last_blobs: Option<Instant>,
    blobs_loaded: bool,
}

impl Communicator {
    /// Build the worker plus the ready gate released after the first
    /// successful predicate sync.
    pub fn new(
        ctx: Arc<CommunicatorCtx>,
        config: CommunicatorConfig,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<bool>) {
        let (ready_tx, ready_rx) = watch::channel(false);
        (
            Self {
                ctx,
                config,
                cancel,
                ready_tx,
                predicates: HashMap::new(),
                last_sensors: None,
                last_predicates: None,
                last_blobs: None,
                blobs_loaded: false,
            },
            ready_rx,
        )
    }

    pub async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let started = Instant::now();
            if self.ctx.allow_sync.load(Ordering::Acquire) {
                self.pass().await;
            }
            let remaining = self.config.pass_interval.saturating_sub(started.elapsed());
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(remaining) => {}
                _ = self.ctx.signal.notified() => {}
            }
        }
        // Shutdown: make the pending queues durable.
        self.ctx.samples.checkpoint(true);
        self.ctx.events.checkpoint(true);
        self.ctx.audit.checkpoint(true);
    }

    fn is_due(&self, last: Option<Instant>, interval: Duration) -> bool {
        last.map_or(true, |at| at.elapsed() >= interval)
    }

    async fn pass(&mut self) {
        if self.ctx.flags.pathpoints {
            self.sync_samples().await;
            self.sync_catalog().await;
            if self.is_due(self.last_sensors, self.config.sensors_interval)
                && self.sync_sensors().await
            {
                self.last_sensors = Some(Instant::now());
            }
        }

        if self.ctx.flags.predicates
            && self.is_due(self.last_predicates, self.config.predicates_interval)
            && self.sync_predicates().await
        {
            self.last_predicates = Some(Instant::now());
            let _ = self.ready_tx.send(true);
        }

        if self.ctx.flags.blobs {
            let forced = self.ctx.blob_resync.swap(false, Ordering::AcqRel);
            if forced || self.is_due(self.last_blobs, self.config.blobs_interval) {
                if self.sync_blobs().await {
                    self.last_blobs = Some(Instant::now());
                } else if forced {
                    self.ctx.blob_resync.store(true, Ordering::Release);
                }
            }
        }

        if self.ctx.flags.audit {
            self.sync_audit().await;
        }

        if self.ctx.flags.orders && !self.ctx.sync_worker.has_async_orders() {
            self.fetch_orders().await;
        }

        if self.ctx.flags.predicates {
            self.tick_predicates().await;
            self.sync_events().await;
        }

        self.ctx.samples.checkpoint(false);
        self.ctx.events.checkpoint(false);
        self.ctx.audit.checkpoint(false);
    }

    /// Step 1 — drain the sample store through the sync worker.
    async fn sync_samples(&self) {
        let Some(snapshot) = self.ctx.samples.snapshot_for_sync() else { return };
        if snapshot.is_empty() {
            snapshot.ack();
            return;
        }
        let wire = snapshot.as_wire();
        match self.ctx.sync_worker.sync_pathpoints(&wire).await {
            Ok(()) => snapshot.ack(),
            Err(e) if e.clients_fault => {
                // A damaged batch can never succeed; drop it instead of
                // poisoning every later pass.
                tracing::warn!("sample batch rejected by the cloud, dropping it");
                snapshot.ack();
            }
            Err(e) => {
                snapshot.nack();
                if e.no_link {
                    self.ctx.hooks.on_failed_sync().await;
                }
            }
        }
    }

    /// Step 2 — push the local catalog shape, apply authoritative
    /// storage levels back.
    async fn sync_catalog(&self) {
        let Some(shape) = self.ctx.pathpoints.take_dirty_shape() else { return };
        let body = Json::Array(
            shape
                .iter()
                .map(|(name, level)| {
                    serde_json::json!({"path": name, "storage_level": level.to_wire()})
                })
                .collect(),
        );
        match self.ctx.api.put("/v1/device/pathpoints", &body).await {
            Ok(resp) => {
                let Some(items) = resp.as_array() else { return };
                for item in items {
                    let Some(name) = item.get("path").and_then(Json::as_str) else { continue };
                    if name.starts_with('r') {
                        continue;
                    }
                    let level = item
                        .get("storage_level")
                        .and_then(Json::as_u64)
                        .and_then(StorageLevel::from_wire)
                        .unwrap_or(StorageLevel::Trend);
                    match self.ctx.pathpoints.get_or_create(name, level) {
                        Ok(point) => {
                            if point.handler().is_none() {
                                if let Some(handler) = self.ctx.hooks.provide_unknown_pathpoint(name)
                                {
                                    point.set_handler(handler);
                                }
                            }
                            if point.storage_level() != level {
                                point.set_storage_level(level);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(path = name, err = %e, "cloud reported a bad pathpoint name");
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(err = %e, "pathpoint catalog sync failed");
                self.ctx.pathpoints.mark_dirty();
            }
        }
    }

    /// Step 3 — rebuild the sensor catalog.
    async fn sync_sensors(&self) -> bool {
        match self.ctx.api.get("/v1/device/sensors").await {
            Ok(resp) => {
                let sensors: Vec<Sensor> = resp
                    .as_array()
                    .map(|items| items.iter().filter_map(Sensor::from_wire).collect())
                    .unwrap_or_default();
                for sensor in &sensors {
                    for path in sensor.pathpoints() {
                        if let Err(e) =
                            self.ctx.pathpoints.get_or_create(path, StorageLevel::Trend)
                        {
                            tracing::warn!(path = %path, err = %e, "sensor references a bad pathpoint");
                        }
                    }
                }
                self.ctx.sensors.on_sync(sensors);
                true
            }
            Err(e) => {
                tracing::warn!(err = %e, "sensor sync failed");
                false
            }
        }
    }

    /// Step 4 — reconcile predicate instances with the authoritative
    /// list.
    async fn sync_predicates(&mut self) -> bool {
        let resp = match self.ctx.api.get("/v1/device/predicates").await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(err = %e, "predicate sync failed");
                return false;
            }
        };
        let specs: Vec<PredicateSpec> = resp
            .as_array()
            .map(|items| items.iter().filter_map(PredicateSpec::from_wire).collect())
            .unwrap_or_default();

        let mut seen = HashSet::new();
        for spec in specs {
            seen.insert(spec.predicate_id.clone());
            if !spec.online {
                if let Some(mut instance) = self.predicates.remove(&spec.predicate_id) {
                    instance.inner.on_offline(&instance.ctx).await;
                }
                continue;
            }
            if !self.predicates.contains_key(&spec.predicate_id) {
                let (inner, undefined): (Box<dyn Predicate>, bool) = match self
                    .ctx
                    .registry
                    .try_match(&spec.statistic_name, &spec.configuration)
                {
                    Some(factory) => (factory(&spec), false),
                    None => (Box::new(UndefinedPredicate), true),
                };
                let ctx = PredicateContext::new(
                    spec.clone(),
                    Arc::clone(&self.ctx.events),
                    Arc::clone(&self.ctx.signal),
                );
                self.predicates
                    .insert(spec.predicate_id.clone(), PredicateInstance { ctx, inner, undefined });
                continue;
            }
            if let Some(instance) = self.predicates.get_mut(&spec.predicate_id) {
                let old = instance.ctx.spec().clone();
                if old.configuration != spec.configuration {
                    instance
                        .inner
                        .on_configuration_changed(&instance.ctx, &spec.configuration)
                        .await;
                }
                if old.silencing != spec.silencing {
                    instance.inner.on_silencing_changed(&instance.ctx, &spec.silencing).await;
                }
                if old.verbose_name != spec.verbose_name {
                    instance
                        .inner
                        .on_verbose_name_changed(&instance.ctx, &spec.verbose_name)
                        .await;
                }
                if old.group != spec.group {
                    instance.inner.on_group_changed(&instance.ctx, &spec.group).await;
                }
                instance.ctx.update_spec(spec);
            }
        }

        let gone: Vec<String> =
            self.predicates.keys().filter(|id| !seen.contains(*id)).cloned().collect();
        for id in gone {
            if let Some(mut instance) = self.predicates.remove(&id) {
                instance.inner.on_offline(&instance.ctx).await;
            }
        }
        true
    }

    /// Step 5 — three-way blob reconciliation.
    async fn sync_blobs(&mut self) -> bool {
        let body = Json::Array(
            self.ctx
                .blobs
                .digest()
                .into_iter()
                .map(|(key, version)| serde_json::json!({"key": key, "version": version}))
                .collect(),
        );
        let resp = match self.ctx.api.post("/v1/device/baobs", &body).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(err = %e, "blob reconciliation failed");
                return false;
            }
        };

        for key in string_list(&resp, "should_download") {
            match self.ctx.api.get_raw(&format!("/v1/device/baobs/{key}")).await {
                Ok((bytes, headers)) => {
                    let version = headers
                        .get(BLOB_VERSION_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    self.ctx.blobs.set(&key, bytes, version);
                    tracing::debug!(key = %key, version, "downloaded blob");
                    if self.blobs_loaded {
                        self.ctx.hooks.on_blob_updated(&key).await;
                    }
                }
                Err(e) => tracing::warn!(key = %key, err = %e, "blob download failed"),
            }
        }
        for key in string_list(&resp, "should_upload") {
            let Some(bytes) = self.ctx.blobs.value(&key) else { continue };
            let version = self.ctx.blobs.version(&key);
            match self.ctx.api.put_bytes(&format!("/v1/device/baobs/{key}"), bytes, version).await {
                Ok(()) => tracing::debug!(key = %key, version, "uploaded blob"),
                Err(e) => tracing::warn!(key = %key, err = %e, "blob upload failed"),
            }
        }
        for key in string_list(&resp, "should_delete") {
            self.ctx.blobs.delete(&key);
        }
        self.blobs_loaded = true;
        true
    }

    /// Step 6 — drain the sensor-write audit log.
    async fn sync_audit(&self) {
        let Some(snapshot) = self.ctx.audit.snapshot_for_sync() else { return };
        match self.ctx.api.put("/v1/device/sensor/write_log", &snapshot.as_wire()).await {
            Ok(_) => snapshot.ack(),
            Err(e) if e.is_clients_fault() => {
                tracing::warn!(err = %e, "audit batch rejected, dropping it");
                snapshot.ack();
            }
            Err(e) => {
                tracing::warn!(err = %e, "audit sync failed");
                snapshot.nack();
            }
        }
    }

    /// Step 7 — pull pending orders (HTTP strategy only).
    async fn fetch_orders(&self) {
        match self.ctx.api.post_empty("/v1/device/orders").await {
            Ok(resp) if !resp.is_null() => {
                for (section, _handle) in sections_from_wire(&resp) {
                    if self.ctx.section_tx.send(section).is_err() {
                        return;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(err = %e, "order fetch failed"),
        }
    }

    /// Step 8 — run every predicate's tick with its state loaded and
    /// persisted around the call; upgrade placeholders that can now be
    /// matched.
    async fn tick_predicates(&mut self) {
        for instance in self.predicates.values_mut() {
            if instance.undefined {
                let spec = instance.ctx.spec().clone();
                if let Some(factory) =
                    self.ctx.registry.try_match(&spec.statistic_name, &spec.configuration)
                {
                    tracing::info!(predicate_id = %spec.predicate_id, "late-registered statistic matched");
                    instance.inner = factory(&spec);
                    instance.undefined = false;
                }
            }
            instance.ctx.load_state();
            instance.inner.on_tick(&instance.ctx).await;
            instance.ctx.store_state();
        }
    }

    /// Step 9 — announce events, ack with server-assigned UUIDs.
    async fn sync_events(&self) {
        let Some(snapshot) = self.ctx.events.snapshot_for_sync() else { return };
        match self.ctx.api.post("/v1/device/alarms", &snapshot.as_wire()).await {
            Ok(resp) => {
                let uuids: Vec<String> = resp
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|item| item.get("uuid").and_then(Json::as_str))
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default();
                snapshot.ack(&uuids);
            }
            Err(e) if e.is_clients_fault() => {
                tracing::warn!(err = %e, "event batch rejected, dropping it");
                snapshot.ack(&[]);
            }
            Err(e) => {
                tracing::warn!(err = %e, "event sync failed");
                snapshot.nack();
            }
        }
    }
}

fn string_list(value: &Json, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Json::as_array)
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "communicator_tests.rs"]
mod tests;

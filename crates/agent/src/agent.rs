// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent facade: owns the stores and worker activities, selects the
//! sync strategy and exposes the embedder-facing surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tether_uplink::{TlsDialer, UplinkDriver, UplinkTlsConfig};

use crate::api::CloudApi;
use crate::archive::ArchiveStore;
use crate::blob::Blob;
use crate::config::{AgentConfig, SyncStrategy};
use crate::device::{DeviceInfo, SlaveDeviceInfo, StorageLevel};
use crate::error::{AgentError, ResponseError};
use crate::event::{Event, Severity};
use crate::macros::MacroStore;
use crate::metadata::{encode_key, MetadataStore};
use crate::orders::Section;
use crate::pathpoint::{Pathpoint, PathpointHandler, PathpointMap};
use crate::predicate::{PredicateFactory, PredicateRegistry, RegistrationHandle};
use crate::reparse::{ReparseEvaluator, SubstitutionEvaluator};
use crate::sensor::{Sensor, SensorWriteEvent};
use crate::store::audit::AuditStore;
use crate::store::backend::{BlobBackend, StateBackend};
use crate::store::blobs::BlobStore;
use crate::store::events::EventStore;
use crate::store::pathpoints::SampleStore;
use crate::store::sensors::SensorStore;
use crate::sync::{spawn_order_pump, HttpSyncWorker, SyncWorker, UplinkSyncWorker};
use crate::value::PathpointValue;
use crate::worker::{
    Archiver, ArchiverConfig, CloudLogLayer, Communicator, CommunicatorConfig, LogPublisher,
    LogSink,
};
use crate::worker::archiver::ArchiverCtx;
use crate::worker::communicator::CommunicatorCtx;
use crate::worker::executor::{ExecutorCtx, OrderExecutor};
use crate::worker::logs::LogPublisherConfig;

/// Embedder-overridable behavior at the agent's seams.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    /// Called before a cannot-join section executes. Must block until
    /// every order issued so far through embedder-side dispatch has
    /// settled, or until the agent is terminating.
    async fn sync_sections(&self, _terminating: bool) {}

    /// Claim a section for custom execution. Returning true bypasses
    /// the default per-order dispatch; the section is then marked done.
    async fn execute_section(&self, _section: &Section) -> bool {
        false
    }

    /// A sync pass failed because the link is down.
    async fn on_failed_sync(&self) {}

    /// A blob was downloaded on a reconcile pass after the first.
    async fn on_blob_updated(&self, _key: &str) {}

    /// Supply a handler for a pathpoint referenced by an order or the
    /// cloud but never registered locally.
    fn provide_unknown_pathpoint(&self, _name: &str) -> Option<Arc<dyn PathpointHandler>> {
        None
    }

    /// Handle a custom sysctl operation; return true when recognized.
    async fn execute_sysctl(&self, _op_type: &str, _op_args: &str) -> bool {
        false
    }
}

/// The no-op hook set.
pub struct DefaultHooks;

impl AgentHooks for DefaultHooks {}

/// Extra knobs for embedders that need non-default cadence or reparse
/// evaluation.
pub struct AgentTuning {
    pub communicator: CommunicatorConfig,
    pub archiver: ArchiverConfig,
    pub logs: LogPublisherConfig,
    pub reparse_eval: Arc<dyn ReparseEvaluator>,
    pub log_service: String,
}

impl Default for AgentTuning {
    fn default() -> Self {
        Self {
            communicator: CommunicatorConfig::default(),
            archiver: ArchiverConfig::default(),
            logs: LogPublisherConfig::default(),
            reparse_eval: Arc::new(SubstitutionEvaluator),
            log_service: "tether-agent".to_owned(),
        }
    }
}

struct AgentInner {
    api: Arc<CloudApi>,
    samples: Arc<SampleStore>,
    events: Arc<EventStore>,
    audit: Arc<AuditStore>,
    sensors: Arc<SensorStore>,
    blobs: Arc<BlobStore>,
    pathpoints: Arc<PathpointMap>,
    registry: Arc<PredicateRegistry>,
    metadata: Arc<MetadataStore>,
    macros: Arc<MacroStore>,
    section_tx: mpsc::UnboundedSender<Section>,
    signal: Arc<Notify>,
    blob_resync: Arc<AtomicBool>,
    allow_sync: Arc<AtomicBool>,
    cancel: CancellationToken,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    ready_rx: watch::Receiver<bool>,
    pressure_tx: watch::Sender<u8>,
    sink: LogSink,
    reparse_eval: Arc<dyn ReparseEvaluator>,
    temp_credentials: Mutex<Vec<tempfile::TempPath>>,
    flags: crate::config::SubsystemFlags,
    device_id: String,
}

/// One running agent instance.
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl Agent {
    /// Start the agent: load stores, select the sync strategy and spawn
    /// the worker activities.
    pub fn start(
        config: AgentConfig,
        backend: Arc<dyn StateBackend>,
        blob_backend: Arc<dyn BlobBackend>,
        hooks: Arc<dyn AgentHooks>,
        tuning: AgentTuning,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        let cert_pem = config.certificate.read()?;
        let key_pem = config.private_key.read()?;

        // In-memory credentials are spilled to ephemeral files for
        // consumers that want a path; removed again on close.
        let mut temp_credentials = Vec::new();
        for (material, bytes) in
            [(&config.certificate, &cert_pem), (&config.private_key, &key_pem)]
        {
            if material.is_in_memory() {
                let mut file = tempfile::NamedTempFile::new().map_err(|e| {
                    AgentError::InvalidCredentials(format!("spilling credentials: {e}"))
                })?;
                use std::io::Write;
                file.write_all(bytes).map_err(|e| {
                    AgentError::InvalidCredentials(format!("spilling credentials: {e}"))
                })?;
                temp_credentials.push(file.into_temp_path());
            }
        }

        let environment = config.identity.environment;
        let base_url = config
            .api_base_url
            .clone()
            .unwrap_or_else(|| environment.api_base_url().to_owned());
        let api = Arc::new(
            CloudApi::new(environment, base_url, &cert_pem, &key_pem)
                .map_err(|e| AgentError::InvalidCredentials(e.to_string()))?,
        );

        let signal = Arc::new(Notify::new());
        let samples = SampleStore::new(Arc::clone(&backend), Arc::clone(&signal));
        let events = EventStore::new(Arc::clone(&backend), Arc::clone(&signal));
        let audit = AuditStore::new(Arc::clone(&backend), Arc::clone(&signal));
        let sensors = Arc::new(SensorStore::new());
        let blobs = BlobStore::new(blob_backend, Arc::clone(&signal));
        let pathpoints = Arc::new(PathpointMap::new());
        let registry = Arc::new(PredicateRegistry::new());
        let metadata = MetadataStore::new(Arc::clone(&backend), config.metadata_ttl);
        let macros = MacroStore::new(Arc::clone(&backend));
        let archive = ArchiveStore::new(Arc::clone(&backend));

        let (section_tx, section_rx) = mpsc::unbounded_channel();
        let blob_resync = Arc::new(AtomicBool::new(false));
        let allow_sync = Arc::new(AtomicBool::new(config.continue_boot));
        let cancel = CancellationToken::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        // Strategy selection: persistent uplink or plain HTTP.
        let sync_worker: Arc<dyn SyncWorker> = match config.strategy {
            SyncStrategy::Http => Arc::new(HttpSyncWorker::new(Arc::clone(&api))),
            SyncStrategy::Uplink => {
                let tls = UplinkTlsConfig::new(
                    environment.uplink_host(),
                    cert_pem.clone(),
                    key_pem.clone(),
                    config.ca_chain.clone(),
                );
                let dialer = Arc::new(
                    TlsDialer::new(tls)
                        .map_err(|e| AgentError::InvalidCredentials(e.to_string()))?,
                );
                let (order_tx, order_rx) = mpsc::channel(64);
                let order_sink = config.flags.orders.then_some(order_tx);
                let handle = UplinkDriver::spawn(dialer, order_sink, cancel.child_token());
                if config.flags.orders {
                    spawn_order_pump(
                        order_rx,
                        section_tx.clone(),
                        handle.clone(),
                        cancel.child_token(),
                    );
                }
                Arc::new(UplinkSyncWorker::new(handle))
            }
        };

        // Order executor.
        let executor_ctx = Arc::new(ExecutorCtx {
            pathpoints: Arc::clone(&pathpoints),
            samples: Arc::clone(&samples),
            api: Arc::clone(&api),
            hooks: Arc::clone(&hooks),
            blobs: Arc::clone(&blobs),
            blob_resync: Arc::clone(&blob_resync),
            signal: Arc::clone(&signal),
        });
        tasks.push(tokio::spawn(
            OrderExecutor::new(section_rx, executor_ctx, cancel.child_token()).run(),
        ));

        // Communicator.
        let communicator_ctx = Arc::new(CommunicatorCtx {
            api: Arc::clone(&api),
            sync_worker: Arc::clone(&sync_worker),
            samples: Arc::clone(&samples),
            events: Arc::clone(&events),
            audit: Arc::clone(&audit),
            sensors: Arc::clone(&sensors),
            blobs: Arc::clone(&blobs),
            pathpoints: Arc::clone(&pathpoints),
            registry: Arc::clone(&registry),
            hooks: Arc::clone(&hooks),
            section_tx: section_tx.clone(),
            signal: Arc::clone(&signal),
            blob_resync: Arc::clone(&blob_resync),
            allow_sync: Arc::clone(&allow_sync),
            flags: config.flags,
        });
        let (communicator, ready_rx) =
            Communicator::new(communicator_ctx, tuning.communicator, cancel.child_token());
        tasks.push(tokio::spawn(communicator.run()));

        // Archive & macro worker.
        if config.flags.macros || config.flags.archives {
            let archiver_ctx = Arc::new(ArchiverCtx {
                api: Arc::clone(&api),
                macros: Arc::clone(&macros),
                archive: Arc::clone(&archive),
                metadata: Arc::clone(&metadata),
                section_tx: section_tx.clone(),
                flags: config.flags,
            });
            tasks.push(tokio::spawn(
                Archiver::new(archiver_ctx, tuning.archiver, cancel.child_token()).run(),
            ));
        } else {
            // Metadata uploads normally drain in the archiver's pass.
            let metadata = Arc::clone(&metadata);
            let api = Arc::clone(&api);
            let cancel = cancel.child_token();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(std::time::Duration::from_secs(60)) => {}
                    }
                    while let Some(update) = metadata.pop_pending() {
                        let path =
                            format!("/v1/device/metadata/plain/{}", encode_key(&update.key));
                        let result = match &update.value {
                            Some(value) => {
                                api.put(
                                    &path,
                                    &serde_json::json!({
                                        "value": value,
                                        "unless_timestamp_higher": update.timestamp_s,
                                    }),
                                )
                                .await
                            }
                            None => api.delete(&path).await,
                        };
                        if let Err(e) = result {
                            tracing::warn!(key = %update.key, err = %e, "metadata update dropped");
                        }
                    }
                }
            }));
        }

        // Log publisher.
        let (pressure_tx, pressure_rx) = watch::channel(0u8);
        let (publisher, sink) = LogPublisher::new(
            tuning.log_service,
            Arc::clone(&sync_worker),
            Arc::clone(&allow_sync),
            pressure_rx,
            tuning.logs,
            cancel.child_token(),
        );
        tasks.push(tokio::spawn(publisher.run()));

        Ok(Self {
            inner: Arc::new(AgentInner {
                api,
                samples,
                events,
                audit,
                sensors,
                blobs,
                pathpoints,
                registry,
                metadata,
                macros,
                section_tx,
                signal,
                blob_resync,
                allow_sync,
                cancel,
                closed: AtomicBool::new(false),
                tasks: Mutex::new(tasks),
                ready_rx,
                pressure_tx,
                sink,
                reparse_eval: tuning.reparse_eval,
                temp_credentials: Mutex::new(temp_credentials),
                flags: config.flags,
                device_id: config.identity.device_id,
            }),
        })
    }

    fn guard(&self) -> Result<(), AgentError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(AgentError::AlreadyClosed);
        }
        Ok(())
    }

    fn guard_subsystem(&self, enabled: bool, what: &'static str) -> Result<(), AgentError> {
        self.guard()?;
        if !enabled {
            return Err(AgentError::Unavailable(what));
        }
        Ok(())
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    /// Release the workers when the agent was started with
    /// `continue_boot: false`.
    pub fn continue_boot(&self) -> Result<(), AgentError> {
        self.guard()?;
        self.inner.allow_sync.store(true, Ordering::Release);
        self.inner.signal.notify_one();
        Ok(())
    }

    /// Block until the first predicate reconciliation has completed.
    pub async fn wait_until_synced(&self) -> Result<(), AgentError> {
        self.guard()?;
        let mut rx = self.inner.ready_rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return Ok(());
            }
            if rx.changed().await.is_err() {
                return Err(AgentError::AlreadyClosed);
            }
        }
    }

    // ---- pathpoints ------------------------------------------------

    /// Look a pathpoint up, materializing it on first reference.
    pub fn pathpoint(&self, name: &str) -> Result<Arc<Pathpoint>, AgentError> {
        self.guard_subsystem(self.inner.flags.pathpoints, "pathpoints")?;
        self.inner.pathpoints.get_or_create(name, StorageLevel::Trend)
    }

    /// Register a pathpoint with its I/O handler.
    pub fn register_pathpoint(
        &self,
        name: &str,
        storage_level: StorageLevel,
        handler: Arc<dyn PathpointHandler>,
    ) -> Result<Arc<Pathpoint>, AgentError> {
        self.guard_subsystem(self.inner.flags.pathpoints, "pathpoints")?;
        let point = self.inner.pathpoints.get_or_create(name, storage_level)?;
        point.set_handler(handler);
        self.inner.signal.notify_one();
        Ok(point)
    }

    /// Schedule sections for execution, in order (unless joinable).
    pub fn execute(&self, section: Section) -> Result<(), AgentError> {
        self.guard()?;
        self.inner
            .section_tx
            .send(section)
            .map_err(|_| AgentError::AlreadyClosed)
    }

    /// Latest value of a pathpoint. Derived points evaluate their
    /// constituents through the configured expression evaluator.
    pub fn current_value(&self, name: &str) -> Result<(u64, PathpointValue), AgentError> {
        self.guard_subsystem(self.inner.flags.pathpoints, "pathpoints")?;
        if crate::value::is_derived_path(name) {
            let point = self.inner.pathpoints.get_or_create(name, StorageLevel::Trend)?;
            let Some(spec) = point.derived() else {
                return Err(AgentError::NotReady(format!("{name:?} is not derived")));
            };
            let mut newest = 0u64;
            let mut values = Vec::with_capacity(spec.constituents.len());
            for constituent in &spec.constituents {
                let (ts, value) =
                    self.inner.samples.current(constituent).map_err(AgentError::Operation)?;
                newest = newest.max(ts);
                values.push(value);
            }
            let combined = self
                .inner
                .reparse_eval
                .eval(&spec.expression, &values)
                .map_err(AgentError::Operation)?;
            return Ok((newest, combined));
        }
        self.inner.samples.current(name).map_err(AgentError::Operation)
    }

    /// Archived samples of a pathpoint, oldest first.
    pub fn archive_of(
        &self,
        name: &str,
        start_ms: Option<u64>,
        stop_ms: Option<u64>,
    ) -> Result<Vec<crate::value::Sample>, AgentError> {
        self.guard_subsystem(self.inner.flags.pathpoints, "pathpoints")?;
        Ok(self.inner.samples.archive(name, start_ms, stop_ms).collect())
    }

    // ---- sensors ---------------------------------------------------

    /// Look a sensor up by tag set.
    pub fn sensor(&self, tag_set: &str) -> Result<Sensor, AgentError> {
        self.guard_subsystem(self.inner.flags.pathpoints, "pathpoints")?;
        self.inner
            .sensors
            .get(tag_set)
            .ok_or_else(|| AgentError::NotFound(format!("sensor {tag_set:?}")))
    }

    pub fn all_sensors(&self) -> Result<Vec<Sensor>, AgentError> {
        self.guard_subsystem(self.inner.flags.pathpoints, "pathpoints")?;
        Ok(self.inner.sensors.all())
    }

    /// Current value of a sensor, combined from its constituents.
    pub fn sensor_value(&self, sensor: &Sensor) -> Result<(u64, PathpointValue), AgentError> {
        self.guard_subsystem(self.inner.flags.pathpoints, "pathpoints")?;
        let mut newest = 0u64;
        let mut values = Vec::new();
        for path in sensor.pathpoints() {
            let (ts, value) = self.inner.samples.current(path).map_err(AgentError::Operation)?;
            newest = newest.max(ts);
            values.push(value);
        }
        let combined = sensor.combine(&values).map_err(AgentError::Operation)?;
        Ok((newest, combined))
    }

    /// Queue an audit record for an executed sensor write.
    pub fn log_sensor_write(&self, event: SensorWriteEvent) -> Result<(), AgentError> {
        self.guard_subsystem(self.inner.flags.audit, "sensor write audit")?;
        self.inner.audit.add(event);
        Ok(())
    }

    // ---- events & predicates --------------------------------------

    /// Open a new alert event.
    #[allow(clippy::too_many_arguments)]
    pub fn open_event(
        &self,
        started_on: Option<u64>,
        ended_on: Option<u64>,
        severity: Severity,
        is_point: bool,
        token: &str,
        group: &str,
        message: &str,
        metadata: std::collections::HashMap<String, String>,
    ) -> Result<Event, AgentError> {
        self.guard_subsystem(self.inner.flags.predicates, "predicates")?;
        let event =
            Event::new(started_on, ended_on, severity, is_point, token, group, message, metadata);
        self.inner.events.add(event.clone());
        Ok(event)
    }

    /// Close an open event.
    pub fn close_event(&self, event: &Event) -> Result<(), AgentError> {
        self.guard_subsystem(self.inner.flags.predicates, "predicates")?;
        if !self.inner.events.close(event.effective_id(), None) {
            return Err(AgentError::NotFound(format!("event {}", event.effective_id())));
        }
        Ok(())
    }

    pub fn open_events(&self) -> Result<Vec<Event>, AgentError> {
        self.guard_subsystem(self.inner.flags.predicates, "predicates")?;
        Ok(self.inner.events.get_open())
    }

    pub fn get_event(&self, event_id: &str) -> Result<Event, AgentError> {
        self.guard_subsystem(self.inner.flags.predicates, "predicates")?;
        self.inner
            .events
            .get(event_id)
            .ok_or_else(|| AgentError::NotFound(format!("event {event_id}")))
    }

    /// Register an alerting-rule class by statistic name.
    pub fn register_statistic(
        &self,
        statistic_name: &str,
        factory: PredicateFactory,
    ) -> Result<RegistrationHandle, AgentError> {
        self.guard_subsystem(self.inner.flags.predicates, "predicates")?;
        Ok(self.inner.registry.register_statistic(statistic_name, factory))
    }

    // ---- blobs -----------------------------------------------------

    pub fn blob(&self, key: &str) -> Result<Blob, AgentError> {
        self.guard_subsystem(self.inner.flags.blobs, "blobs")?;
        Ok(Blob::new(
            key.to_owned(),
            Arc::clone(&self.inner.blobs),
            Arc::clone(&self.inner.blob_resync),
            Arc::clone(&self.inner.signal),
        ))
    }

    pub fn blob_keys(&self) -> Result<Vec<String>, AgentError> {
        self.guard_subsystem(self.inner.flags.blobs, "blobs")?;
        Ok(self.inner.blobs.keys())
    }

    // ---- metadata --------------------------------------------------

    /// Read a metadata value, falling back to the cloud when the local
    /// copy is stale or missing.
    pub async fn metadata_get(&self, key: &str) -> Result<Option<String>, AgentError> {
        self.guard()?;
        if !self.inner.metadata.needs_refresh(key) {
            return Ok(self.inner.metadata.get_local(key));
        }
        match self
            .inner
            .api
            .get(&format!("/v1/device/metadata/plain/{}", encode_key(key)))
            .await
        {
            Ok(resp) => {
                let value = resp.get("value").and_then(|v| v.as_str()).unwrap_or_default();
                let ts = resp.get("timestamp").and_then(|v| v.as_u64()).unwrap_or(0);
                self.inner.metadata.update_from_server(key, value, ts);
                Ok(Some(value.to_owned()))
            }
            Err(e) if e.status_code == 404 => Ok(self.inner.metadata.get_local(key)),
            Err(e) => {
                // Stale local data beats an error when the link is down.
                match self.inner.metadata.get_local(key) {
                    Some(value) => Ok(Some(value)),
                    None => Err(AgentError::Response(e)),
                }
            }
        }
    }

    pub fn metadata_set(&self, key: &str, value: &str) -> Result<(), AgentError> {
        self.guard()?;
        self.inner.metadata.put(key, value);
        Ok(())
    }

    pub fn metadata_delete(&self, key: &str) -> Result<(), AgentError> {
        self.guard()?;
        self.inner.metadata.delete(key);
        Ok(())
    }

    // ---- device ----------------------------------------------------

    /// Fetch fresh device metadata from the cloud.
    pub async fn get_device_info(&self) -> Result<DeviceInfo, AgentError> {
        self.guard()?;
        let resp = self.inner.api.get("/v1/device").await.map_err(AgentError::Response)?;
        DeviceInfo::from_wire(&resp)
            .ok_or_else(|| AgentError::Response(ResponseError::new(200, "undecodable device info")))
    }

    /// The slave devices attached to this one.
    pub async fn get_slaves(&self) -> Result<Vec<SlaveDeviceInfo>, AgentError> {
        Ok(self.get_device_info().await?.slaves)
    }

    /// Link-state and free-form instrumentation of a slave.
    pub async fn slave_instrumentation(
        &self,
        slave_id: &str,
    ) -> Result<serde_json::Value, AgentError> {
        self.guard()?;
        self.inner
            .api
            .get(&format!("/v1/device/instrumentation/{slave_id}"))
            .await
            .map_err(AgentError::Response)
    }

    pub async fn set_slave_instrumentation(
        &self,
        slave_id: &str,
        patch: &serde_json::Value,
    ) -> Result<(), AgentError> {
        self.guard()?;
        self.inner
            .api
            .patch(&format!("/v1/device/instrumentation/{slave_id}"), patch)
            .await
            .map(|_| ())
            .map_err(AgentError::Response)
    }

    // ---- logging & pressure ---------------------------------------

    /// Sink for routing records into the cloud log pipeline.
    pub fn log_sink(&self) -> LogSink {
        self.inner.sink.clone()
    }

    /// `tracing` layer feeding the cloud log pipeline.
    pub fn log_layer(&self) -> CloudLogLayer {
        CloudLogLayer::new(self.inner.sink.clone())
    }

    /// Report memory-pressure severity from the embedder's watchdog.
    pub fn report_memory_pressure(&self, level: u8) {
        let _ = self.inner.pressure_tx.send(level);
    }

    // ---- lifecycle -------------------------------------------------

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Terminate the workers, join them, persist pending state and
    /// remove ephemeral credential files. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(err = %e, "worker did not shut down cleanly");
            }
        }
        self.inner.samples.checkpoint(true);
        self.inner.events.checkpoint(true);
        self.inner.audit.checkpoint(true);
        self.inner.macros.checkpoint(true);
        self.inner.metadata.checkpoint(true);
        for path in self.inner.temp_credentials.lock().drain(..) {
            if let Err(e) = path.close() {
                tracing::warn!(err = %e, "failed to remove credential temp file");
            }
        }
    }
}

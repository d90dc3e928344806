// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The log publisher: a bounded buffer of structured log records shipped
//! to the cloud in batches, with back-off on failure and drop policies
//! under pressure. A `tracing` layer feeds the queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::clock::MonotoneIssuer;
use crate::error::SyncError;
use crate::sync::SyncWorker;

/// Queue length cap enforced while shipping is disallowed.
pub const MAX_BUFFER: usize = 20_000;
/// Memory-pressure severity at which the whole queue is dropped.
pub const PRESSURE_DROP_LEVEL: u8 = 2;

/// One structured log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub service: String,
    /// Microseconds; strictly increasing within the process.
    #[serde(rename = "when")]
    pub when_us: u64,
    pub message: String,
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_text: Option<String>,
    #[serde(rename = "exception_traceback", skip_serializing_if = "Option::is_none")]
    pub exception_tb: Option<String>,
}

impl LogRecord {
    pub fn to_wire(&self) -> Json {
        serde_json::to_value(self).unwrap_or(Json::Null)
    }

    /// Rough wire size, for the batch byte budget.
    fn approx_len(&self) -> usize {
        64 + self.message.len()
            + self.exception_text.as_ref().map_or(0, String::len)
            + self.exception_tb.as_ref().map_or(0, String::len)
    }
}

/// Producer half: stamps records with the monotone issuer and enqueues
/// them for shipping.
#[derive(Clone)]
pub struct LogSink {
    service: String,
    tx: mpsc::UnboundedSender<LogRecord>,
    issuer: Arc<MonotoneIssuer>,
}

impl LogSink {
    pub fn emit(&self, level: &str, message: String) {
        self.emit_full(level, message, None, None);
    }

    pub fn emit_full(
        &self,
        level: &str,
        message: String,
        exception_text: Option<String>,
        exception_tb: Option<String>,
    ) {
        let record = LogRecord {
            service: self.service.clone(),
            when_us: self.issuer.next_us(),
            message,
            level: level.to_owned(),
            exception_text,
            exception_tb,
        };
        let _ = self.tx.send(record);
    }
}

/// Batch and pacing knobs.
#[derive(Debug, Clone)]
pub struct LogPublisherConfig {
    pub max_buffer: usize,
    /// Preferred budget: a batch stops growing past this many bytes.
    pub batch_bytes: usize,
    /// Fallback cap on records per batch.
    pub batch_records: usize,
    /// Wait after the first record so siblings ride the same batch.
    pub pickup_delay: Duration,
    pub backoff_floor: Duration,
    pub backoff_ceil: Duration,
}

impl Default for LogPublisherConfig {
    fn default() -> Self {
        Self {
            max_buffer: MAX_BUFFER,
            batch_bytes: 128 * 1024,
            batch_records: 50,
            pickup_delay: Duration::from_secs(1),
            backoff_floor: Duration::from_secs(1),
            backoff_ceil: Duration::from_secs(30),
        }
    }
}

/// The log publisher worker.
pub struct LogPublisher {
    rx: mpsc::UnboundedReceiver<LogRecord>,
    queue: VecDeque<LogRecord>,
    sync_worker: Arc<dyn SyncWorker>,
    allow_sync: Arc<AtomicBool>,
    pressure: watch::Receiver<u8>,
    config: LogPublisherConfig,
    cancel: CancellationToken,
    backoff: Duration,
}

impl LogPublisher {
    /// Build the worker plus its sink.
    pub fn new(
        service: impl Into<String>,
        sync_worker: Arc<dyn SyncWorker>,
        allow_sync: Arc<AtomicBool>,
        pressure: watch::Receiver<u8>,
        config: LogPublisherConfig,
        cancel: CancellationToken,
    ) -> (Self, LogSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink =
            LogSink { service: service.into(), tx, issuer: Arc::new(MonotoneIssuer::new()) };
        let backoff = config.backoff_floor;
        (
            Self {
                rx,
                queue: VecDeque::new(),
                sync_worker,
                allow_sync,
                pressure,
                config,
                cancel,
                backoff,
            },
            sink,
        )
    }

    pub async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.apply_pressure();
            self.drain_ready();

            if self.queue.is_empty() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = self.pressure.changed() => {}
                    record = self.rx.recv() => match record {
                        Some(record) => self.queue.push_back(record),
                        None => break,
                    },
                }
                continue;
            }

            if !self.allow_sync.load(Ordering::Acquire) {
                // Shipping is off: keep the buffer bounded by shedding
                // the oldest records, and wait for something to change.
                while self.queue.len() > self.config.max_buffer {
                    self.queue.pop_front();
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = self.pressure.changed() => {}
                    record = self.rx.recv() => match record {
                        Some(record) => self.queue.push_back(record),
                        None => break,
                    },
                }
                continue;
            }

            // Let sibling records land in the same batch.
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.pickup_delay) => {}
            }
            self.apply_pressure();
            self.drain_ready();
            let batch = self.take_batch();
            if batch.is_empty() {
                continue;
            }
            self.ship(batch).await;
        }

        // Final effort: ship what is left when allowed.
        self.drain_ready();
        if self.allow_sync.load(Ordering::Acquire) {
            while !self.queue.is_empty() {
                let batch = self.take_batch();
                let wire = Json::Array(batch.iter().map(LogRecord::to_wire).collect());
                if self.sync_worker.sync_logs(&wire).await.is_err() {
                    break;
                }
            }
        }
    }

    fn apply_pressure(&mut self) {
        if *self.pressure.borrow() >= PRESSURE_DROP_LEVEL && !self.queue.is_empty() {
            tracing::error!(
                target: "tether::worker::logs",
                dropped = self.queue.len(),
                "memory pressure, dropping the log queue"
            );
            self.queue.clear();
        }
    }

    fn drain_ready(&mut self) {
        while let Ok(record) = self.rx.try_recv() {
            self.queue.push_back(record);
        }
    }

    /// Take the next batch off the front: stop at the byte budget, never
    /// exceed the record cap.
    fn take_batch(&mut self) -> Vec<LogRecord> {
        let mut batch = Vec::new();
        let mut bytes = 0usize;
        while batch.len() < self.config.batch_records {
            let record_len = match self.queue.front() {
                Some(record) => record.approx_len(),
                None => break,
            };
            if !batch.is_empty() && bytes + record_len > self.config.batch_bytes {
                break;
            }
            if let Some(record) = self.queue.pop_front() {
                bytes += record_len;
                batch.push(record);
            }
        }
        batch
    }

    async fn ship(&mut self, batch: Vec<LogRecord>) {
        let wire = Json::Array(batch.iter().map(LogRecord::to_wire).collect());
        match self.sync_worker.sync_logs(&wire).await {
            Ok(()) => {
                self.backoff = self.config.backoff_floor;
            }
            Err(SyncError { clients_fault: true, .. }) => {
                tracing::warn!(
                    target: "tether::worker::logs",
                    records = batch.len(),
                    "log batch rejected, dropping it"
                );
                self.backoff = self.config.backoff_floor;
            }
            Err(_) => {
                // Put the batch back in order and back off.
                for record in batch.into_iter().rev() {
                    self.queue.push_front(record);
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.backoff) => {}
                }
                self.backoff = (self.backoff * 2).min(self.config.backoff_ceil);
            }
        }
    }
}

/// `tracing` layer feeding events into the log publisher queue.
pub struct CloudLogLayer {
    sink: LogSink,
}

impl CloudLogLayer {
    pub fn new(sink: LogSink) -> Self {
        Self { sink }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::layer::Layer<S> for CloudLogLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let target = event.metadata().target();
        // The shipping path logs its own failures; feeding those back in
        // would loop.
        if target.starts_with("tether::worker::logs") {
            return;
        }
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.sink.emit(event.metadata().level().as_str(), visitor.finish(target));
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn finish(self, target: &str) -> String {
        let mut out = format!("{target}: {}", self.message);
        for (name, value) in self.fields {
            out.push(' ');
            out.push_str(&name);
            out.push('=');
            out.push_str(&value);
        }
        out
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push((field.name().to_owned(), format!("{value:?}")));
        }
    }
}

#[cfg(test)]
#[path = "logs_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pending-sync store of sampled pathpoint values.
//!
//! Samples accumulate per point in strictly timestamp-monotonic order
//! until a communicator pass drains them through a snapshot. At most one
//! snapshot is live at a time across the process; acknowledging it
//! removes everything up to the highest acked timestamp per point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value as Json;
use tokio::sync::Notify;

use crate::error::{FailureKind, OperationFailure};
use crate::store::backend::StateBackend;
use crate::value::{PathpointValue, Sample, SampleValue};

const DOMAIN: &str = "samples";

struct Inner {
    series: IndexMap<String, Vec<Sample>>,
}

/// C1 — the data-point store.
pub struct SampleStore {
    state: Mutex<Inner>,
    snapshot_out: AtomicBool,
    backend: Arc<dyn StateBackend>,
    signal: Arc<Notify>,
}

impl SampleStore {
    /// Create the store, loading pending samples from the backend.
    pub fn new(backend: Arc<dyn StateBackend>, signal: Arc<Notify>) -> Arc<Self> {
        let mut series = IndexMap::new();
        if let Some(bytes) = backend.load(DOMAIN) {
            if let Ok(value) = serde_json::from_slice::<Json>(&bytes) {
                series = decode_series(&value);
            }
        }
        Arc::new(Self {
            state: Mutex::new(Inner { series }),
            snapshot_out: AtomicBool::new(false),
            backend,
            signal,
        })
    }

    /// Append a sample iff its timestamp advances the point's series.
    /// Out-of-order inserts are a no-op.
    pub fn on_new_data(&self, path: &str, sample: Sample) -> bool {
        let mut state = self.state.lock();
        let series = state.series.entry(path.to_owned()).or_default();
        if let Some(last) = series.last() {
            if sample.timestamp_ms <= last.timestamp_ms {
                return false;
            }
        }
        series.push(sample);
        drop(state);
        self.signal.notify_one();
        true
    }

    /// Latest value of a point. Fails with `NotRead` when no sample was
    /// ever taken and with the stored failure when the last one errored.
    pub fn current(&self, path: &str) -> Result<(u64, PathpointValue), OperationFailure> {
        let state = self.state.lock();
        let last = state
            .series
            .get(path)
            .and_then(|series| series.last())
            .ok_or_else(|| OperationFailure::new(FailureKind::NotRead))?;
        match &last.payload {
            SampleValue::Value(value) => Ok((last.timestamp_ms, value.clone())),
            SampleValue::Error(kind) => Err(OperationFailure::at(*kind, last.timestamp_ms)),
        }
    }

    /// Ordered samples of a point within `[start, stop]` (both
    /// unbounded when `None`).
    pub fn archive(
        &self,
        path: &str,
        start_ms: Option<u64>,
        stop_ms: Option<u64>,
    ) -> impl Iterator<Item = Sample> {
        let state = self.state.lock();
        let samples: Vec<Sample> = state
            .series
            .get(path)
            .map(|series| {
                series
                    .iter()
                    .filter(|s| start_ms.map_or(true, |b| s.timestamp_ms >= b))
                    .filter(|s| stop_ms.map_or(true, |b| s.timestamp_ms <= b))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        samples.into_iter()
    }

    /// Obtain the one live snapshot, or `None` when the store is empty
    /// or another snapshot is still outstanding.
    pub fn snapshot_for_sync(self: &Arc<Self>) -> Option<SampleSnapshot> {
        let data: Vec<(String, Vec<Sample>)> = {
            let state = self.state.lock();
            if state.series.is_empty() {
                return None;
            }
            state.series.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        if self.snapshot_out.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(SampleSnapshot { store: Arc::clone(self), data, acked: false })
    }

    /// Persist pending samples. The backend throttles; `force` bypasses
    /// it (shutdown path).
    pub fn checkpoint(&self, force: bool) {
        let wire = self.pending_as_wire();
        let Ok(bytes) = serde_json::to_vec(&wire) else { return };
        if force {
            self.backend.persist_now(DOMAIN, &bytes);
        } else {
            self.backend.persist(DOMAIN, &bytes);
        }
    }

    /// Number of points with pending samples.
    pub fn pending_paths(&self) -> usize {
        self.state.lock().series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().series.is_empty()
    }

    fn pending_as_wire(&self) -> Json {
        let state = self.state.lock();
        encode_series(&state.series)
    }

    fn apply_ack(&self, acked: &[(String, Vec<Sample>)]) {
        let mut state = self.state.lock();
        for (path, samples) in acked {
            let Some(max_ts) = samples.iter().map(|s| s.timestamp_ms).max() else { continue };
            if let Some(series) = state.series.get_mut(path) {
                series.retain(|s| s.timestamp_ms > max_ts);
            }
        }
        state.series.retain(|_, series| !series.is_empty());
    }

    fn release_snapshot(&self) {
        self.snapshot_out.store(false, Ordering::Release);
    }
}

/// One outstanding sync batch. Dropping it without `ack` counts as a
/// negative acknowledgement: the samples stay put for the next pass.
pub struct SampleSnapshot {
    store: Arc<SampleStore>,
    data: Vec<(String, Vec<Sample>)>,
    acked: bool,
}

impl SampleSnapshot {
    /// Wire form: `[{path, values: [...]}]`.
    pub fn as_wire(&self) -> Json {
        Json::Array(
            self.data
                .iter()
                .map(|(path, samples)| {
                    serde_json::json!({
                        "path": path,
                        "values": samples.iter().map(Sample::to_wire).collect::<Vec<_>>(),
                    })
                })
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|(_, samples)| samples.is_empty())
    }

    /// The batch reached the cloud: drop everything it covered.
    pub fn ack(mut self) {
        self.store.apply_ack(&self.data);
        self.acked = true;
    }

    /// The batch did not make it; keep the samples.
    pub fn nack(self) {}
}

impl Drop for SampleSnapshot {
    fn drop(&mut self) {
        self.store.release_snapshot();
    }
}

fn encode_series(series: &IndexMap<String, Vec<Sample>>) -> Json {
    Json::Array(
        series
            .iter()
            .map(|(path, samples)| {
                serde_json::json!({
                    "path": path,
                    "values": samples.iter().map(Sample::to_wire).collect::<Vec<_>>(),
                })
            })
            .collect(),
    )
}

fn decode_series(value: &Json) -> IndexMap<String, Vec<Sample>> {
    let mut series = IndexMap::new();
    let Some(items) = value.as_array() else { return series };
    for item in items {
        let Some(path) = item.get("path").and_then(Json::as_str) else { continue };
        let Some(values) = item.get("values").and_then(Json::as_array) else { continue };
        let samples: Vec<Sample> = values.iter().filter_map(Sample::from_wire).collect();
        if !samples.is_empty() {
            series.insert(path.to_owned(), samples);
        }
    }
    series
}

#[cfg(test)]
#[path = "pathpoints_tests.rs"]
mod tests;

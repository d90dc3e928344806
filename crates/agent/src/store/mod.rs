// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable per-domain stores sitting between the workers: sampled
//! values, alert events, the sensor-write audit trail, the sensor
//! catalog and keyed binary objects.

pub mod audit;
pub mod backend;
pub mod blobs;
pub mod events;
pub mod pathpoints;
pub mod sensors;

pub use audit::AuditStore;
pub use backend::{BlobBackend, DirBackend, MemoryBackend, StateBackend};
pub use blobs::BlobStore;
pub use events::EventStore;
pub use pathpoints::{SampleSnapshot, SampleStore};
pub use sensors::SensorStore;

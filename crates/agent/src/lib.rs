// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Edge-side agent of the device telemetry and control platform.
//!
//! One agent instance represents one physical or logical device. It keeps
//! a handful of versioned data domains reconciled with the cloud, executes
//! remotely issued orders against local I/O points, evaluates locally
//! hosted alerting rules and ships structured logs — all while surviving
//! intermittent connectivity and restarts.

pub mod agent;
pub mod api;
pub mod archive;
pub mod blob;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod macros;
pub mod metadata;
pub mod orders;
pub mod pathpoint;
pub mod predicate;
pub mod reparse;
pub mod sensor;
pub mod store;
pub mod sync;
pub mod value;
pub mod worker;

pub use agent::{Agent, AgentHooks, AgentTuning, DefaultHooks};
pub use config::{AgentConfig, CredentialMaterial, SyncStrategy};
pub use device::{DeviceIdentity, DeviceInfo, Environment, StorageLevel};
pub use error::{AgentError, FailureKind, OperationFailure, ResponseError, SyncError};
pub use event::{Event, Severity};
pub use orders::{AdviseLevel, Disposition, Order, Section, SectionHandle};
pub use pathpoint::PathpointHandler;
pub use predicate::{Predicate, PredicateContext, PredicateSpec, SilencingWindow};
pub use value::{PathpointValue, Sample, SampleValue, ValueKind};

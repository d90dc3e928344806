// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Simulator binary: runs one agent against loopback I/O points, so a
//! device can be exercised end to end without real hardware.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use parking_lot::Mutex;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tether::agent::{Agent, AgentTuning, DefaultHooks};
use tether::config::{AgentConfig, CredentialMaterial, SyncStrategy};
use tether::device::{DeviceIdentity, Environment, StorageLevel};
use tether::error::OperationFailure;
use tether::orders::AdviseLevel;
use tether::pathpoint::PathpointHandler;
use tether::store::backend::{BlobBackend, DirBackend, MemoryBackend, StateBackend};
use tether::value::PathpointValue;

/// Loopback simulator for a tether device agent.
#[derive(Debug, Parser)]
#[command(name = "tether-sim", version, about)]
struct Flags {
    /// Path to the device certificate (PEM).
    #[arg(long, env = "TETHER_CERT")]
    cert: PathBuf,

    /// Path to the device private key (PEM).
    #[arg(long, env = "TETHER_KEY")]
    key: PathBuf,

    /// Path to the uplink trust anchors (device CA ∥ root CA, PEM).
    #[arg(long, env = "TETHER_CA_CHAIN")]
    ca_chain: Option<PathBuf>,

    /// Device identifier from the provisioning layer.
    #[arg(long, env = "TETHER_DEVICE_ID")]
    device_id: String,

    /// Environment: production, staging or local.
    #[arg(long, env = "TETHER_ENVIRONMENT", default_value = "staging")]
    environment: String,

    /// Directory for persisted state; in-memory when omitted.
    #[arg(long, env = "TETHER_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Use the persistent TLS uplink instead of plain HTTP.
    #[arg(long, env = "TETHER_UPLINK")]
    uplink: bool,

    /// Base URL override for the HTTP API.
    #[arg(long, env = "TETHER_API_URL")]
    api_url: Option<String>,

    /// Loopback pathpoints to register.
    #[arg(long, default_values_t = [String::from("W1"), String::from("d_temp")])]
    pathpoint: Vec<String>,

    /// Disable order intake.
    #[arg(long)]
    no_orders: bool,

    /// Disable blob reconciliation.
    #[arg(long)]
    no_blobs: bool,

    /// Disable macros and archive reads.
    #[arg(long)]
    no_schedules: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TETHER_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Flags {
    fn environment(&self) -> anyhow::Result<Environment> {
        match self.environment.to_lowercase().as_str() {
            "production" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            "local" => Ok(Environment::LocalDevelopment),
            other => anyhow::bail!("invalid environment: {other}"),
        }
    }
}

/// I/O handler that echoes back whatever was last written.
struct LoopbackHandler {
    value: Mutex<PathpointValue>,
}

#[async_trait]
impl PathpointHandler for LoopbackHandler {
    async fn on_read(&self, _advise: AdviseLevel) -> Result<PathpointValue, OperationFailure> {
        Ok(self.value.lock().clone())
    }

    async fn on_write(
        &self,
        value: PathpointValue,
        _advise: AdviseLevel,
    ) -> Result<(), OperationFailure> {
        *self.value.lock() = value;
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let flags = Flags::parse();
    if let Err(e) = run(flags).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run(flags: Flags) -> anyhow::Result<()> {
    let environment = flags.environment()?;
    let identity = DeviceIdentity { device_id: flags.device_id.clone(), environment };
    let mut config = AgentConfig::new(
        identity,
        CredentialMaterial::Path(flags.cert.clone()),
        CredentialMaterial::Path(flags.key.clone()),
        match &flags.ca_chain {
            Some(path) => std::fs::read(path)?,
            None => Vec::new(),
        },
    );
    config.strategy = if flags.uplink { SyncStrategy::Uplink } else { SyncStrategy::Http };
    config.api_base_url = flags.api_url.clone();
    config.flags.orders = !flags.no_orders;
    config.flags.blobs = !flags.no_blobs;
    config.flags.macros = !flags.no_schedules;
    config.flags.archives = !flags.no_schedules;

    let agent = match &flags.state_dir {
        Some(dir) => {
            let backend = Arc::new(DirBackend::new(dir)?);
            Agent::start(
                config,
                Arc::clone(&backend) as Arc<dyn StateBackend>,
                backend as Arc<dyn BlobBackend>,
                Arc::new(DefaultHooks),
                AgentTuning::default(),
            )?
        }
        None => Agent::start(
            config,
            Arc::new(MemoryBackend),
            Arc::new(MemoryBackend),
            Arc::new(DefaultHooks),
            AgentTuning::default(),
        )?,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(flags.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(agent.log_layer())
        .init();

    for name in &flags.pathpoint {
        let handler = Arc::new(LoopbackHandler { value: Mutex::new(PathpointValue::U16(0)) });
        agent.register_pathpoint(name, StorageLevel::Trend, handler)?;
        info!(pathpoint = %name, "registered loopback point");
    }

    info!(device_id = %flags.device_id, "agent running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    agent.close().await;
    Ok(())
}

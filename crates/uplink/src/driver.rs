// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background driver owning the uplink connection: dials with mutual-auth
//! TLS, reconnects forever with exponential backoff, pumps frame I/O and
//! dispatches settlements and server-pushed orders.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::conn::{ConnState, Settlement, UplinkConn};
use crate::error::{ConnectionFailed, UplinkError};
use crate::frame::{Frame, FrameType};

/// Default uplink TCP port.
pub const DEFAULT_PORT: u16 = 2408;
/// TCP + TLS handshake deadline.
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
/// Readiness timeout for one pump pass; ping checks run at this cadence.
const IDLE_TICK: Duration = Duration::from_secs(1);
/// Reconnect backoff bounds.
const BACKOFF_FLOOR: Duration = Duration::from_secs(1);
const BACKOFF_CEIL: Duration = Duration::from_secs(30);

/// Object-safe transport bound for dialed streams.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Transport connector. Production uses [`TlsDialer`]; tests inject
/// in-memory pipes.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<UplinkConn<Box<dyn AsyncStream>>, ConnectionFailed>;
}

/// Certificates and endpoint for the mutual-auth TLS uplink.
#[derive(Clone)]
pub struct UplinkTlsConfig {
    pub host: String,
    pub port: u16,
    /// Device certificate chain, PEM.
    pub cert_pem: Vec<u8>,
    /// Device private key, PEM.
    pub key_pem: Vec<u8>,
    /// Trust anchors: device CA concatenated with the root CA, PEM.
    pub ca_pem: Vec<u8>,
}

impl UplinkTlsConfig {
    pub fn new(host: impl Into<String>, cert_pem: Vec<u8>, key_pem: Vec<u8>, ca_pem: Vec<u8>) -> Self {
        Self { host: host.into(), port: DEFAULT_PORT, cert_pem, key_pem, ca_pem }
    }
}

/// Dialer establishing mutual-auth TLS 1.2+ connections.
pub struct TlsDialer {
    config: UplinkTlsConfig,
    tls: tokio_rustls::TlsConnector,
}

impl TlsDialer {
    pub fn new(config: UplinkTlsConfig) -> Result<Self, ConnectionFailed> {
        let mut roots = rustls::RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut &config.ca_pem[..]) {
            let cert = cert.map_err(|e| {
                ConnectionFailed::protocol(format!("undecodable trust anchor: {e}"))
            })?;
            roots
                .add(cert)
                .map_err(|e| ConnectionFailed::protocol(format!("bad trust anchor: {e}")))?;
        }
        let certs: Vec<_> = rustls_pemfile::certs(&mut &config.cert_pem[..])
            .collect::<Result<_, _>>()
            .map_err(|e| ConnectionFailed::protocol(format!("undecodable certificate: {e}")))?;
        let key = rustls_pemfile::private_key(&mut &config.key_pem[..])
            .map_err(|e| ConnectionFailed::protocol(format!("undecodable private key: {e}")))?
            .ok_or_else(|| ConnectionFailed::protocol("no private key in PEM"))?;
        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
            .map_err(|e| ConnectionFailed::protocol(format!("client auth setup: {e}")))?;
        let tls = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
        Ok(Self { config, tls })
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    async fn dial(&self) -> Result<UplinkConn<Box<dyn AsyncStream>>, ConnectionFailed> {
        let addr = (self.config.host.as_str(), self.config.port);
        let tcp = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ConnectionFailed::no_internet("connect timed out"))?
            .map_err(|e| ConnectionFailed::no_internet(e.to_string()))?;
        let server_name = rustls::pki_types::ServerName::try_from(self.config.host.clone())
            .map_err(|e| ConnectionFailed::protocol(format!("bad server name: {e}")))?;
        let stream = tokio::time::timeout(DIAL_TIMEOUT, self.tls.connect(server_name, tcp))
            .await
            .map_err(|_| ConnectionFailed::no_internet("TLS handshake timed out"))?
            .map_err(|e| ConnectionFailed::no_internet(e.to_string()))?;
        Ok(UplinkConn::from_stream(Box::new(stream) as Box<dyn AsyncStream>))
    }
}

/// An `ORDER` frame delivered by the server. The consumer settles it via
/// [`UplinkHandle::settle_order`] once the resulting work has finished.
#[derive(Debug)]
pub struct IncomingOrder {
    pub tid: u16,
    pub payload: serde_json::Value,
}

enum Command {
    SyncPathpoints { payload: Bytes, done: oneshot::Sender<Settlement> },
    StreamLogs { payload: Bytes },
    SettleOrder { tid: u16, ok: bool },
}

/// Cheap cloneable handle for talking to the driver task.
#[derive(Clone)]
pub struct UplinkHandle {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnState>,
}

impl UplinkHandle {
    pub fn is_connected(&self) -> bool {
        *self.state_rx.borrow() == ConnState::Ready
    }

    pub fn state(&self) -> ConnState {
        *self.state_rx.borrow()
    }

    /// Wait until the driver reports a live connection. Returns
    /// immediately if the driver has shut down.
    pub async fn wait_connected(&self) {
        let mut rx = self.state_rx.clone();
        loop {
            match *rx.borrow_and_update() {
                ConnState::Ready | ConnState::Closed => return,
                _ => {}
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Submit a pathpoint-sample batch over the link and wait for the
    /// server's settlement.
    pub async fn sync_pathpoints(&self, payload: &serde_json::Value) -> Result<(), UplinkError> {
        if !self.is_connected() {
            return Err(ConnectionFailed::no_internet("uplink not connected").into());
        }
        let bytes = encode_payload(payload)?;
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SyncPathpoints { payload: bytes, done: done_tx })
            .await
            .map_err(|_| closing())?;
        done_rx.await.map_err(|_| closing())?
    }

    /// Ship a log batch on a best-effort basis (no settlement).
    pub async fn stream_logs(&self, payload: &serde_json::Value) -> Result<(), UplinkError> {
        if !self.is_connected() {
            return Err(ConnectionFailed::no_internet("uplink not connected").into());
        }
        let bytes = encode_payload(payload)?;
        self.cmd_tx
            .send(Command::StreamLogs { payload: bytes })
            .await
            .map_err(|_| closing())?;
        Ok(())
    }

    /// Settle a server-delivered order: positive settlement confirms the
    /// tid, negative settlement rejects it.
    pub async fn settle_order(&self, tid: u16, ok: bool) {
        let _ = self.cmd_tx.send(Command::SettleOrder { tid, ok }).await;
    }
}

fn encode_payload(payload: &serde_json::Value) -> Result<Bytes, UplinkError> {
    serde_json::to_vec(payload)
        .map(Bytes::from)
        .map_err(|e| UplinkError::Invalid(crate::error::InvalidFrame::bad_payload(&e.to_string())))
}

fn closing() -> UplinkError {
    ConnectionFailed::protocol("closing the link").into()
}

/// Owns the reconnect loop. Spawned once per agent when the persistent
/// uplink strategy is selected.
pub struct UplinkDriver {
    dialer: Arc<dyn Dialer>,
    cancel: CancellationToken,
    cmd_rx: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnState>,
    order_tx: Option<mpsc::Sender<IncomingOrder>>,
}

enum PumpEvent {
    Cancelled,
    Cmd(Option<Command>),
    Io(Result<Option<Frame>, ConnectionFailed>),
}

impl UplinkDriver {
    /// Spawn the driver task. When `order_tx` is set, the driver requests
    /// order delivery on every connect and forwards pushed orders to it.
    pub fn spawn(
        dialer: Arc<dyn Dialer>,
        order_tx: Option<mpsc::Sender<IncomingOrder>>,
        cancel: CancellationToken,
    ) -> UplinkHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnState::Disconnected);
        let driver = Self { dialer, cancel, cmd_rx, state_tx, order_tx };
        tokio::spawn(driver.run());
        UplinkHandle { cmd_tx, state_rx }
    }

    async fn run(mut self) {
        let mut backoff = BACKOFF_FLOOR;
        while !self.cancel.is_cancelled() {
            let _ = self.state_tx.send(ConnState::Connecting);
            match self.dialer.dial().await {
                Ok(mut conn) => {
                    backoff = BACKOFF_FLOOR;
                    let _ = self.state_tx.send(ConnState::Ready);
                    tracing::debug!("uplink connected");
                    if self.order_tx.is_some() {
                        conn.send_frame(&Frame::new(0, FrameType::FetchOrders, Bytes::new()));
                    }
                    match self.pump(&mut conn).await {
                        Ok(()) => {
                            conn.close("closing the link");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(err = %e, "uplink connection failed");
                            conn.close(&e.reason);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(err = %e, "uplink connect failed");
                }
            }
            let _ = self.state_tx.send(ConnState::Disconnected);
            self.drain_commands();

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(BACKOFF_CEIL);
        }
        let _ = self.state_tx.send(ConnState::Closed);
        self.drain_commands();
    }

    /// Fail queued commands while no connection exists, so settlement
    /// futures never dangle across reconnects.
    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            if let Command::SyncPathpoints { done, .. } = cmd {
                let _ = done.send(Err(ConnectionFailed::no_internet("uplink not connected").into()));
            }
        }
    }

    async fn pump(
        &mut self,
        conn: &mut UplinkConn<Box<dyn AsyncStream>>,
    ) -> Result<(), ConnectionFailed> {
        loop {
            conn.check_ping()?;
            let event = tokio::select! {
                _ = self.cancel.cancelled() => PumpEvent::Cancelled,
                cmd = self.cmd_rx.recv() => PumpEvent::Cmd(cmd),
                io = conn.drive(IDLE_TICK) => PumpEvent::Io(io),
            };
            match event {
                PumpEvent::Cancelled => return Ok(()),
                PumpEvent::Cmd(None) => return Ok(()),
                PumpEvent::Cmd(Some(cmd)) => self.apply(conn, cmd)?,
                PumpEvent::Io(res) => {
                    if let Some(frame) = res? {
                        self.dispatch(conn, frame).await?;
                    }
                }
            }
        }
    }

    fn apply(
        &mut self,
        conn: &mut UplinkConn<Box<dyn AsyncStream>>,
        cmd: Command,
    ) -> Result<(), ConnectionFailed> {
        match cmd {
            Command::SyncPathpoints { payload, done } => {
                // tid exhaustion is fatal for the connection; the caller's
                // future resolves through the close path.
                if let Err(e) = conn.send_expecting(FrameType::DataStream, payload, done) {
                    return Err(e);
                }
            }
            Command::StreamLogs { payload } => {
                conn.send_frame(&Frame::new(0, FrameType::Logs, payload));
            }
            Command::SettleOrder { tid, ok } => {
                let frame_type =
                    if ok { FrameType::OrderConfirm } else { FrameType::OrderReject };
                conn.send_frame(&Frame::new(tid, frame_type, Bytes::new()));
            }
        }
        Ok(())
    }

    async fn dispatch(
        &mut self,
        conn: &mut UplinkConn<Box<dyn AsyncStream>>,
        frame: Frame,
    ) -> Result<(), ConnectionFailed> {
        match frame.frame_type {
            FrameType::Ping => conn.note_ping_echo(),
            FrameType::Order => {
                let payload = frame
                    .decode_payload()
                    .map_err(|e| ConnectionFailed::protocol(e.to_string()))?;
                match &self.order_tx {
                    Some(tx) => {
                        let order = IncomingOrder { tid: frame.tid, payload };
                        if tx.send(order).await.is_err() {
                            conn.send_frame(&Frame::new(
                                frame.tid,
                                FrameType::OrderReject,
                                Bytes::new(),
                            ));
                        }
                    }
                    None => {
                        conn.send_frame(&Frame::new(frame.tid, FrameType::OrderReject, Bytes::new()));
                    }
                }
            }
            FrameType::DataStreamConfirm => {
                if !conn.settle(frame.tid, Ok(())) {
                    tracing::debug!(tid = frame.tid, "unknown confirmation");
                }
            }
            FrameType::DataStreamReject => {
                if !conn.settle(frame.tid, Err(UplinkError::DataStreamSyncFailed)) {
                    tracing::debug!(tid = frame.tid, "unknown rejection");
                }
            }
            other => {
                tracing::debug!(frame_type = ?other, tid = frame.tid, "unexpected frame");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;

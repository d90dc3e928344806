// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection-level state for one uplink socket: buffered frame I/O,
//! ping keep-alive bookkeeping and settlement futures keyed by tid.
//!
//! The transport is generic so tests can drive the protocol over an
//! in-memory duplex pipe; production uses a TLS stream (see `driver`).

use std::collections::HashMap;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{ConnectionFailed, UplinkError};
use crate::frame::{Frame, FrameType};
use crate::tid::TidAllocator;

/// Send a ping once the link has been write-idle this long.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Fail the connection when write-idle this long with a ping outstanding.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(90);
/// Fail the connection when read-idle this long with a ping outstanding.
pub const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Lifecycle of one uplink connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Ready,
    Closed,
}

/// Resolution forwarded to a settlement future.
pub type Settlement = Result<(), UplinkError>;

/// One live uplink connection.
///
/// All mutating calls go through `&mut self`; the driver task owns the
/// connection, which serializes them. `drive` performs at most one unit of
/// I/O progress and yields at most one frame per call.
pub struct UplinkConn<S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    state: ConnState,
    rbuf: BytesMut,
    wbuf: BytesMut,
    last_read: Instant,
    last_write: Instant,
    ping_tid: Option<u16>,
    tids: TidAllocator,
    settlements: HashMap<u16, oneshot::Sender<Settlement>>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> UplinkConn<S> {
    /// Wrap an established stream. Entering READY resets buffers and
    /// ping state.
    pub fn from_stream(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let now = Instant::now();
        Self {
            reader,
            writer,
            state: ConnState::Ready,
            rbuf: BytesMut::with_capacity(4096),
            wbuf: BytesMut::with_capacity(4096),
            last_read: now,
            last_write: now,
            ping_tid: None,
            tids: TidAllocator::new(),
            settlements: HashMap::new(),
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn wants_write(&self) -> bool {
        !self.wbuf.is_empty()
    }

    /// Queue a frame for transmission. Does not wait; bytes are drained by
    /// subsequent `drive` calls. A no-op once closed.
    pub fn send_frame(&mut self, frame: &Frame) {
        if self.state == ConnState::Closed {
            return;
        }
        frame.encode_into(&mut self.wbuf);
    }

    /// Queue a frame that expects settlement, resolving `tx` when the
    /// matching confirm/reject arrives (or the connection closes).
    pub fn send_expecting(
        &mut self,
        frame_type: FrameType,
        payload: bytes::Bytes,
        tx: oneshot::Sender<Settlement>,
    ) -> Result<u16, ConnectionFailed> {
        let tid = self
            .tids
            .allocate()
            .ok_or_else(|| ConnectionFailed::protocol("ran out of IDs"))?;
        self.settlements.insert(tid, tx);
        self.send_frame(&Frame::new(tid, frame_type, payload));
        Ok(tid)
    }

    /// Like [`Self::send_expecting`], creating the settlement future.
    pub fn send_with_settlement(
        &mut self,
        frame_type: FrameType,
        payload: bytes::Bytes,
    ) -> Result<oneshot::Receiver<Settlement>, ConnectionFailed> {
        let (tx, rx) = oneshot::channel();
        self.send_expecting(frame_type, payload, tx)?;
        Ok(rx)
    }

    /// Keep-alive bookkeeping, run once per driver pass.
    pub fn check_ping(&mut self) -> Result<(), ConnectionFailed> {
        let now = Instant::now();
        let write_idle = now.duration_since(self.last_write);
        if self.ping_tid.is_some() {
            if now.duration_since(self.last_read) > READ_TIMEOUT {
                return Err(ConnectionFailed::protocol("timed out due to ping (read side)"));
            }
            if write_idle > WRITE_TIMEOUT {
                return Err(ConnectionFailed::protocol("timed out due to ping (write side)"));
            }
        } else if write_idle > PING_INTERVAL {
            let tid = self
                .tids
                .allocate()
                .ok_or_else(|| ConnectionFailed::protocol("ran out of IDs on ping"))?;
            self.ping_tid = Some(tid);
            self.send_frame(&Frame::new(tid, FrameType::Ping, bytes::Bytes::new()));
        }
        Ok(())
    }

    /// Server echoed our ping; reclaim its tid.
    pub fn note_ping_echo(&mut self) {
        if let Some(tid) = self.ping_tid.take() {
            self.tids.free(tid);
        }
    }

    /// Resolve the settlement future registered under `tid`, reclaiming
    /// the id. Returns false for unknown confirmations.
    pub fn settle(&mut self, tid: u16, result: Settlement) -> bool {
        match self.settlements.remove(&tid) {
            Some(tx) => {
                self.tids.free(tid);
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Make one unit of I/O progress: flush queued writes when possible,
    /// read available bytes, and yield at most one decoded frame. Returns
    /// `None` after `idle` elapses with nothing to do.
    pub async fn drive(&mut self, idle: Duration) -> Result<Option<Frame>, ConnectionFailed> {
        if let Some(frame) = self.parse_one()? {
            return Ok(Some(frame));
        }
        enum IoEvent {
            Read(std::io::Result<usize>),
            Wrote(std::io::Result<()>),
            Idle,
        }
        let wants_write = !self.wbuf.is_empty();
        let event = tokio::select! {
            res = self.reader.read_buf(&mut self.rbuf) => IoEvent::Read(res),
            res = write_some(&mut self.writer, &mut self.wbuf), if wants_write => IoEvent::Wrote(res),
            _ = tokio::time::sleep(idle) => IoEvent::Idle,
        };
        match event {
            IoEvent::Read(res) => {
                let n = res.map_err(|e| ConnectionFailed::protocol(e.to_string()))?;
                if n == 0 {
                    return Err(ConnectionFailed::protocol("gracefully closed"));
                }
                self.last_read = Instant::now();
                self.parse_one()
            }
            IoEvent::Wrote(res) => {
                res.map_err(|e| ConnectionFailed::protocol(e.to_string()))?;
                self.last_write = Instant::now();
                Ok(None)
            }
            IoEvent::Idle => Ok(None),
        }
    }

    fn parse_one(&mut self) -> Result<Option<Frame>, ConnectionFailed> {
        Frame::parse(&mut self.rbuf).map_err(|e| ConnectionFailed::protocol(e.to_string()))
    }

    /// Tear the connection down: every outstanding settlement resolves
    /// with a connection error and all tids are reclaimed.
    pub fn close(&mut self, reason: &str) {
        if self.state == ConnState::Closed {
            return;
        }
        self.state = ConnState::Closed;
        for (_, tx) in self.settlements.drain() {
            let _ = tx.send(Err(UplinkError::Connection(ConnectionFailed::protocol(reason))));
        }
        self.ping_tid = None;
        self.tids.reset();
    }

    /// Number of settlement futures currently outstanding.
    pub fn pending_settlements(&self) -> usize {
        self.settlements.len()
    }
}

/// Write as much of `buf` as the transport accepts in one call.
async fn write_some<W: AsyncWrite + Unpin>(
    writer: &mut W,
    buf: &mut BytesMut,
) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    writer.write_buf(buf).await?;
    writer.flush().await
}

#[cfg(test)]
#[path = "conn_tests.rs"]
mod tests;

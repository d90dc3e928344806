// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire frame codec: big-endian `u32 payload_len | u16 tid | u16 type`
//! header followed by the payload. Decoding is buffer-incremental — a frame
//! is only produced once the full header + payload is available.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::InvalidFrame;

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Upper bound on a single payload. Anything larger is treated as a
/// corrupted stream rather than an allocation request.
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Frame types carried on the uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Client liveness probe, echoed by the server.
    Ping,
    /// Server-pushed list of orders; must be settled by the client.
    Order,
    /// Positive settlement for an `Order` tid.
    OrderConfirm,
    /// Fire-and-forget log batch.
    Logs,
    /// Pathpoint-sample batch, expects settlement.
    DataStream,
    /// Positive settlement for a `DataStream` tid.
    DataStreamConfirm,
    /// Negative settlement for a `DataStream` tid.
    DataStreamReject,
    /// Negative settlement for an `Order` tid.
    OrderReject,
    /// Client request for delivery of pending orders.
    FetchOrders,
}

impl FrameType {
    pub fn from_wire(raw: u16) -> Result<Self, InvalidFrame> {
        match raw {
            0 => Ok(Self::Ping),
            1 => Ok(Self::Order),
            2 => Ok(Self::OrderConfirm),
            3 => Ok(Self::Logs),
            4 => Ok(Self::DataStream),
            5 => Ok(Self::DataStreamConfirm),
            6 => Ok(Self::DataStreamReject),
            9 => Ok(Self::OrderReject),
            10 => Ok(Self::FetchOrders),
            other => Err(InvalidFrame::unknown_type(other)),
        }
    }

    pub fn to_wire(self) -> u16 {
        match self {
            Self::Ping => 0,
            Self::Order => 1,
            Self::OrderConfirm => 2,
            Self::Logs => 3,
            Self::DataStream => 4,
            Self::DataStreamConfirm => 5,
            Self::DataStreamReject => 6,
            Self::OrderReject => 9,
            Self::FetchOrders => 10,
        }
    }

    /// Whether a client-sent frame of this type registers a settlement
    /// future keyed by its tid.
    pub fn expects_settlement(self) -> bool {
        matches!(self, Self::DataStream)
    }
}

/// A single decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tid: u16,
    pub frame_type: FrameType,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(tid: u16, frame_type: FrameType, payload: impl Into<Bytes>) -> Self {
        Self { tid, frame_type, payload: payload.into() }
    }

    /// Append the wire form of this frame to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_LEN + self.payload.len());
        buf.put_u32(self.payload.len() as u32);
        buf.put_u16(self.tid);
        buf.put_u16(self.frame_type.to_wire());
        buf.put_slice(&self.payload);
    }

    /// Try to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed — the buffer is left
    /// untouched in that case, so partial input never yields partial state.
    /// On success the consumed bytes are removed from `buf`.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<Frame>, InvalidFrame> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if payload_len > MAX_PAYLOAD {
            return Err(InvalidFrame::oversized(payload_len));
        }
        let tid = u16::from_be_bytes([buf[4], buf[5]]);
        let raw_type = u16::from_be_bytes([buf[6], buf[7]]);
        // Validate the type before waiting for the payload so a corrupted
        // header fails fast instead of stalling on a bogus length.
        let frame_type = FrameType::from_wire(raw_type)?;
        if buf.len() < HEADER_LEN + payload_len {
            return Ok(None);
        }
        buf.advance(HEADER_LEN);
        let payload = buf.split_to(payload_len).freeze();
        Ok(Some(Frame { tid, frame_type, payload }))
    }

    /// Decode the payload as the structured map/list form used by
    /// `Order` and stream frames.
    pub fn decode_payload(&self) -> Result<serde_json::Value, InvalidFrame> {
        serde_json::from_slice(&self.payload).map_err(|e| InvalidFrame::bad_payload(&e.to_string()))
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;

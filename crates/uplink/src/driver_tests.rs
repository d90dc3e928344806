// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::conn::UplinkConn;

/// Dialer handing out pre-arranged streams. `None` entries simulate a
/// network that is down; an exhausted queue keeps failing.
struct MockDialer {
    streams: tokio::sync::Mutex<VecDeque<Option<DuplexStream>>>,
}

impl MockDialer {
    fn new(streams: Vec<Option<DuplexStream>>) -> Arc<Self> {
        Arc::new(Self { streams: tokio::sync::Mutex::new(streams.into()) })
    }
}

#[async_trait::async_trait]
impl Dialer for MockDialer {
    async fn dial(&self) -> Result<UplinkConn<Box<dyn AsyncStream>>, ConnectionFailed> {
        match self.streams.lock().await.pop_front() {
            Some(Some(stream)) => {
                Ok(UplinkConn::from_stream(Box::new(stream) as Box<dyn AsyncStream>))
            }
            _ => Err(ConnectionFailed::no_internet("no route to host")),
        }
    }
}

async fn read_frame(far: &mut DuplexStream, buf: &mut BytesMut) -> Frame {
    loop {
        if let Some(frame) = Frame::parse(buf).expect("well-formed stream") {
            return frame;
        }
        let n = far.read_buf(buf).await.expect("read from far side");
        assert!(n > 0, "far side closed unexpectedly");
    }
}

async fn write_frame(far: &mut DuplexStream, frame: &Frame) {
    let mut out = BytesMut::new();
    frame.encode_into(&mut out);
    far.write_all(&out).await.expect("write to far side");
}

#[tokio::test(start_paused = true)]
async fn data_stream_settles_on_confirm() {
    let (near, mut far) = tokio::io::duplex(64 * 1024);
    let cancel = CancellationToken::new();
    let handle = UplinkDriver::spawn(MockDialer::new(vec![Some(near)]), None, cancel.clone());
    handle.wait_connected().await;

    let sender = handle.clone();
    let submit = tokio::spawn(async move {
        sender.sync_pathpoints(&serde_json::json!([{"path": "W1", "values": [[10, 42]]}])).await
    });

    let mut buf = BytesMut::new();
    let frame = read_frame(&mut far, &mut buf).await;
    assert_eq!(frame.frame_type, FrameType::DataStream);
    let payload = frame.decode_payload().expect("payload");
    assert_eq!(payload[0]["path"], "W1");

    write_frame(&mut far, &Frame::new(frame.tid, FrameType::DataStreamConfirm, Bytes::new())).await;
    let result = submit.await.expect("join");
    assert_eq!(result, Ok(()));
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn data_stream_reject_maps_to_sync_failed() {
    let (near, mut far) = tokio::io::duplex(64 * 1024);
    let cancel = CancellationToken::new();
    let handle = UplinkDriver::spawn(MockDialer::new(vec![Some(near)]), None, cancel.clone());
    handle.wait_connected().await;

    let sender = handle.clone();
    let submit =
        tokio::spawn(async move { sender.sync_pathpoints(&serde_json::json!([])).await });

    let mut buf = BytesMut::new();
    let frame = read_frame(&mut far, &mut buf).await;
    write_frame(&mut far, &Frame::new(frame.tid, FrameType::DataStreamReject, Bytes::new())).await;

    let result = submit.await.expect("join");
    assert_eq!(result, Err(UplinkError::DataStreamSyncFailed));
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn orders_are_fetched_delivered_and_settled() {
    let (near, mut far) = tokio::io::duplex(64 * 1024);
    let cancel = CancellationToken::new();
    let (order_tx, mut order_rx) = mpsc::channel(8);
    let handle =
        UplinkDriver::spawn(MockDialer::new(vec![Some(near)]), Some(order_tx), cancel.clone());
    handle.wait_connected().await;

    // With an order sink installed the driver asks for pending orders
    // right after connecting.
    let mut buf = BytesMut::new();
    let fetch = read_frame(&mut far, &mut buf).await;
    assert_eq!(fetch.frame_type, FrameType::FetchOrders);
    assert_eq!(fetch.tid, 0);

    let orders = serde_json::json!([{"orders": [{"type": "wait", "time": 1}]}]);
    let body = serde_json::to_vec(&orders).expect("encode");
    write_frame(&mut far, &Frame::new(77, FrameType::Order, body)).await;

    let incoming = order_rx.recv().await.expect("order delivered");
    assert_eq!(incoming.tid, 77);
    assert_eq!(incoming.payload, orders);

    handle.settle_order(77, true).await;
    let confirm = read_frame(&mut far, &mut buf).await;
    assert_eq!(confirm.frame_type, FrameType::OrderConfirm);
    assert_eq!(confirm.tid, 77);
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn reconnects_with_backoff_after_failed_dial() {
    let (near, mut far) = tokio::io::duplex(64 * 1024);
    let cancel = CancellationToken::new();
    // Two dead dials before the link comes up.
    let dialer = MockDialer::new(vec![None, None, Some(near)]);
    let handle = UplinkDriver::spawn(dialer, None, cancel.clone());
    handle.wait_connected().await;
    assert!(handle.is_connected());

    // The link works after the retries.
    let sender = handle.clone();
    let submit =
        tokio::spawn(async move { sender.sync_pathpoints(&serde_json::json!([])).await });
    let mut buf = BytesMut::new();
    let frame = read_frame(&mut far, &mut buf).await;
    write_frame(&mut far, &Frame::new(frame.tid, FrameType::DataStreamConfirm, Bytes::new())).await;
    assert_eq!(submit.await.expect("join"), Ok(()));
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn peer_disconnect_reconnects_and_not_connected_errors() {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let cancel = CancellationToken::new();
    let handle = UplinkDriver::spawn(MockDialer::new(vec![Some(near)]), None, cancel.clone());
    handle.wait_connected().await;

    // Server hangs up; the driver tears the connection down and retries
    // (the mock has no more streams, so it stays disconnected).
    drop(far);
    while handle.is_connected() {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let err = handle
        .sync_pathpoints(&serde_json::json!([]))
        .await
        .expect_err("disconnected link must refuse batches");
    assert!(err.is_no_link());
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn cancel_closes_driver() {
    let (near, _far) = tokio::io::duplex(64 * 1024);
    let cancel = CancellationToken::new();
    let handle = UplinkDriver::spawn(MockDialer::new(vec![Some(near)]), None, cancel.clone());
    handle.wait_connected().await;

    cancel.cancel();
    while handle.state() != ConnState::Closed {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let err = handle.sync_pathpoints(&serde_json::json!([])).await;
    assert!(err.is_err());
}

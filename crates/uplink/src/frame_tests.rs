// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bytes::BytesMut;
use proptest::prelude::*;

use super::*;

fn encoded(frame: &Frame) -> BytesMut {
    let mut buf = BytesMut::new();
    frame.encode_into(&mut buf);
    buf
}

#[test]
fn round_trip_basic() {
    let frame = Frame::new(7, FrameType::DataStream, &b"{\"a\":1}"[..]);
    let mut buf = encoded(&frame);
    let parsed = Frame::parse(&mut buf).expect("parse").expect("complete frame");
    assert_eq!(parsed, frame);
    assert!(buf.is_empty());
}

#[test]
fn round_trip_empty_payload() {
    let frame = Frame::new(1, FrameType::Ping, &b""[..]);
    let mut buf = encoded(&frame);
    let parsed = Frame::parse(&mut buf).expect("parse").expect("complete frame");
    assert_eq!(parsed.payload.len(), 0);
    assert_eq!(parsed.frame_type, FrameType::Ping);
}

#[test]
fn truncated_header_needs_more() {
    let frame = Frame::new(3, FrameType::Logs, &b"xyz"[..]);
    let full = encoded(&frame);
    for cut in 0..HEADER_LEN {
        let mut buf = BytesMut::from(&full[..cut]);
        assert_eq!(Frame::parse(&mut buf).expect("parse"), None);
        assert_eq!(buf.len(), cut, "short input must not be consumed");
    }
}

#[test]
fn truncated_payload_needs_more() {
    let frame = Frame::new(3, FrameType::Logs, &b"hello world"[..]);
    let full = encoded(&frame);
    let mut buf = BytesMut::from(&full[..full.len() - 1]);
    assert_eq!(Frame::parse(&mut buf).expect("parse"), None);
    assert_eq!(buf.len(), full.len() - 1);
}

#[test]
fn unknown_type_rejected() {
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&0u32.to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf.extend_from_slice(&7u16.to_be_bytes()); // 7 is not assigned
    assert!(Frame::parse(&mut buf).is_err());
}

#[test]
fn oversized_payload_rejected() {
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&(MAX_PAYLOAD as u32 + 1).to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes());
    assert!(Frame::parse(&mut buf).is_err());
}

#[test]
fn two_frames_parse_one_per_call() {
    let a = Frame::new(1, FrameType::Ping, &b""[..]);
    let b = Frame::new(2, FrameType::Logs, &b"[]"[..]);
    let mut buf = encoded(&a);
    b.encode_into(&mut buf);

    let first = Frame::parse(&mut buf).expect("parse").expect("first");
    assert_eq!(first, a);
    let second = Frame::parse(&mut buf).expect("parse").expect("second");
    assert_eq!(second, b);
    assert_eq!(Frame::parse(&mut buf).expect("parse"), None);
}

#[test]
fn structured_payload_decodes() {
    let value = serde_json::json!({"orders": [{"type": "wait", "time": 5}]});
    let frame = Frame::new(9, FrameType::Order, serde_json::to_vec(&value).expect("encode"));
    assert_eq!(frame.decode_payload().expect("decode"), value);
}

fn frame_type_strategy() -> impl Strategy<Value = FrameType> {
    prop::sample::select(vec![
        FrameType::Ping,
        FrameType::Order,
        FrameType::OrderConfirm,
        FrameType::Logs,
        FrameType::DataStream,
        FrameType::DataStreamConfirm,
        FrameType::DataStreamReject,
        FrameType::OrderReject,
        FrameType::FetchOrders,
    ])
}

proptest! {
    #[test]
    fn round_trip_any(tid in 0u16..0x8000, ft in frame_type_strategy(), payload in prop::collection::vec(any::<u8>(), 0..512)) {
        let frame = Frame::new(tid, ft, payload);
        let mut buf = encoded(&frame);
        let parsed = Frame::parse(&mut buf).unwrap().unwrap();
        prop_assert_eq!(parsed, frame);
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn any_truncation_never_partially_succeeds(tid in 0u16..0x8000, ft in frame_type_strategy(), payload in prop::collection::vec(any::<u8>(), 1..256), cut_back in 1usize..8) {
        let frame = Frame::new(tid, ft, payload);
        let full = encoded(&frame);
        let cut = full.len().saturating_sub(cut_back);
        let mut buf = BytesMut::from(&full[..cut]);
        let before = buf.len();
        let result = Frame::parse(&mut buf);
        // Either "need more bytes" with the buffer untouched, or a header
        // error; never a partially-decoded frame.
        if let Ok(parsed) = result {
            prop_assert!(parsed.is_none());
            prop_assert_eq!(buf.len(), before);
        }
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framed persistent uplink to the cloud: a length-prefixed TLS protocol
//! with transaction IDs, ping keep-alive and server-pushed order delivery.

pub mod conn;
pub mod driver;
pub mod error;
pub mod frame;
pub mod tid;

pub use conn::{ConnState, UplinkConn};
pub use driver::{Dialer, IncomingOrder, TlsDialer, UplinkDriver, UplinkHandle, UplinkTlsConfig};
pub use error::{ConnectionFailed, UplinkError};
pub use frame::{Frame, FrameType, HEADER_LEN};
pub use tid::TidAllocator;

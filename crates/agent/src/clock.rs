// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wall-clock helpers and the monotone timestamp issuer used by the log
//! pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Seconds since the Unix epoch.
pub fn now_s() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Microseconds since the Unix epoch.
pub fn now_us() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros() as u64
}

/// Issues strictly increasing timestamps, so records stamped in process
/// order always carry increasing `when_us` values even when the wall
/// clock stalls or steps backwards.
#[derive(Debug)]
pub struct MonotoneIssuer {
    last: AtomicU64,
}

impl MonotoneIssuer {
    pub fn new() -> Self {
        Self { last: AtomicU64::new(now_us()) }
    }

    /// Return a timestamp no less than the wall clock and strictly
    /// greater than every previously issued one.
    pub fn next_us(&self) -> u64 {
        let wall = now_us();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = wall.max(prev + 1);
            match self.last.compare_exchange_weak(
                prev,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(observed) => prev = observed,
            }
        }
    }
}

impl Default for MonotoneIssuer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;

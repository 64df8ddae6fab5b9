//! Telemetry counters.
//!
//! The network path and the dispatcher each bump their own counters; the
//! status endpoint reads a snapshot. Nothing in either path reads them back,
//! so they never couple the two.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct WallStats {
    connected: AtomicBool,
    received: AtomicU64,
    dropped: AtomicU64,
    protocol_errors: AtomicU64,
    rendered: AtomicU64,
    missed: AtomicU64,
}

/// Point-in-time copy of [`WallStats`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct StatusSnapshot {
    /// Whether a broker session is currently running
    pub connected: bool,
    /// Frames decoded off the wire
    pub received: u64,
    /// Frames discarded because the queue was full
    pub dropped: u64,
    /// Protocol error episodes the parser resynchronized from
    pub protocol_errors: u64,
    /// Frames handed to the display
    pub rendered: u64,
    /// Frames discarded because their deadline had passed
    pub missed: u64,
    /// Server version
    pub version: String,
}

impl WallStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// The parser keeps its own running count; mirror it.
    pub fn set_protocol_errors(&self, errors: u64) {
        self.protocol_errors.store(errors, Ordering::Relaxed);
    }

    pub fn frame_rendered(&self) {
        self.rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_missed(&self) {
        self.missed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            connected: self.connected.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            rendered: self.rendered.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

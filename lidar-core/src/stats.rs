//! C1: lock-free packet/point counters plus sampled logging.
//!
//! Purely observational — nothing here applies back-pressure or rejects
//! traffic; it just counts what happened elsewhere.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

#[derive(Debug, Default)]
pub struct PacketStats {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    packets_dropped_overflow: AtomicU64,
    packets_forwarded: AtomicU64,
    packets_forward_dropped: AtomicU64,
    parse_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub packets_dropped_overflow: u64,
    pub packets_forwarded: u64,
    pub packets_forward_dropped: u64,
    pub parse_errors: u64,
}

impl PacketStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_dropped_overflow(&self) {
        self.packets_dropped_overflow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.packets_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forward_dropped(&self) {
        self.packets_forward_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_dropped_overflow: self.packets_dropped_overflow.load(Ordering::Relaxed),
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
            packets_forward_dropped: self.packets_forward_dropped.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
        }
    }

    /// Logs the current snapshot at `info` level. Callers are expected to
    /// invoke this on a timer rather than per-packet.
    pub fn log_sampled(&self) {
        let s = self.snapshot();
        info!(
            packets_received = s.packets_received,
            bytes_received = s.bytes_received,
            packets_dropped_overflow = s.packets_dropped_overflow,
            packets_forwarded = s.packets_forwarded,
            packets_forward_dropped = s.packets_forward_dropped,
            parse_errors = s.parse_errors,
            "packet stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = PacketStats::new();
        stats.record_received(1206);
        stats.record_received(1206);
        stats.record_parse_error();
        let snap = stats.snapshot();
        assert_eq!(snap.packets_received, 2);
        assert_eq!(snap.bytes_received, 2412);
        assert_eq!(snap.parse_errors, 1);
    }
}

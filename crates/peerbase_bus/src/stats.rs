//! Bus throughput and latency counters.
//!
//! All counters are atomic so producers and workers never block on a stats
//! read, and stats reads never block dispatch.

use crate::event::now_millis;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lock-free running totals for the bus.
#[derive(Debug, Default)]
pub(crate) struct BusStats {
    /// Events accepted for publication (ring or direct broadcast).
    published: AtomicU64,
    /// Events fully dispatched by a worker.
    processed: AtomicU64,
    /// Events that bypassed the ring via the immediate-publish fallback.
    direct_broadcast: AtomicU64,
    /// Sum of enqueue-to-dispatch latencies, in microseconds.
    total_dispatch_micros: AtomicU64,
    /// Events processed during the last completed sampling second.
    events_per_second: AtomicU64,
    /// Timestamp of the most recent publish, epoch millis (0 = never).
    last_event_millis: AtomicU64,
}

impl BusStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.last_event_millis.store(now_millis(), Ordering::Relaxed);
    }

    pub(crate) fn record_direct_broadcast(&self) {
        self.direct_broadcast.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_processed(&self, dispatch_latency: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.total_dispatch_micros
            .fetch_add(dispatch_latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// Recomputes the per-second rate from the previous sample point.
    /// Returns the new sample point.
    pub(crate) fn sample_rate(&self, previous_processed: u64) -> u64 {
        let current = self.processed.load(Ordering::Relaxed);
        self.events_per_second
            .store(current.saturating_sub(previous_processed), Ordering::Relaxed);
        current
    }

    pub(crate) fn snapshot(&self) -> BusStatsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let total_micros = self.total_dispatch_micros.load(Ordering::Relaxed);
        let last = self.last_event_millis.load(Ordering::Relaxed);
        BusStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            processed,
            direct_broadcast: self.direct_broadcast.load(Ordering::Relaxed),
            events_per_second: self.events_per_second.load(Ordering::Relaxed),
            avg_dispatch_micros: if processed == 0 {
                0
            } else {
                total_micros / processed
            },
            last_event_at: if last == 0 { None } else { Some(last) },
        }
    }
}

/// A point-in-time view of the bus counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusStatsSnapshot {
    /// Total events accepted for publication.
    pub published: u64,
    /// Total events dispatched by workers.
    pub processed: u64,
    /// Events that took the overflow fallback straight to the shared
    /// stream, skipping per-subscriber delivery.
    pub direct_broadcast: u64,
    /// Events processed during the last completed sampling second.
    pub events_per_second: u64,
    /// Average enqueue-to-dispatch latency in microseconds.
    pub avg_dispatch_micros: u64,
    /// Epoch-millis timestamp of the most recent publish.
    pub last_event_at: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = BusStats::new();
        stats.record_published();
        stats.record_published();
        stats.record_processed(Duration::from_micros(100));
        stats.record_processed(Duration::from_micros(300));

        let snap = stats.snapshot();
        assert_eq!(snap.published, 2);
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.avg_dispatch_micros, 200);
        assert!(snap.last_event_at.is_some());
    }

    #[test]
    fn empty_snapshot_has_no_last_event() {
        let snap = BusStats::new().snapshot();
        assert_eq!(snap.published, 0);
        assert_eq!(snap.avg_dispatch_micros, 0);
        assert!(snap.last_event_at.is_none());
    }

    #[test]
    fn rate_sampling_diffs_processed() {
        let stats = BusStats::new();
        for _ in 0..5 {
            stats.record_processed(Duration::ZERO);
        }
        let point = stats.sample_rate(0);
        assert_eq!(point, 5);
        assert_eq!(stats.snapshot().events_per_second, 5);

        for _ in 0..3 {
            stats.record_processed(Duration::ZERO);
        }
        stats.sample_rate(point);
        assert_eq!(stats.snapshot().events_per_second, 3);
    }

    #[test]
    fn direct_broadcast_counts_separately() {
        let stats = BusStats::new();
        stats.record_published();
        stats.record_direct_broadcast();
        let snap = stats.snapshot();
        assert_eq!(snap.published, 1);
        assert_eq!(snap.direct_broadcast, 1);
    }
}

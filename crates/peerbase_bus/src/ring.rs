//! Bounded ring buffer channel between publishers and dispatch workers.
//!
//! The ring is a fixed power-of-two array of slots indexed by two
//! monotonically increasing counters: `head` (next slot a producer may
//! claim) and `tail` (next slot a worker may claim). Wraparound is a
//! bitmask. The buffer is deliberately bounded: a full ring is
//! backpressure, not an error.
//!
//! Claiming is a single atomic compare-exchange on the respective counter,
//! so slot claims are serialized in strict order even though producers and
//! workers otherwise run in parallel. Each slot is written by exactly one
//! producer and taken by exactly one worker per lap; the per-slot mutex
//! only covers the handoff between index claim and slot access.

use crate::envelope::EventEnvelope;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// Fixed-capacity MPMC channel for pending event envelopes.
pub(crate) struct RingBufferChannel {
    slots: Box<[Mutex<Option<EventEnvelope>>]>,
    mask: u64,
    /// Next slot index to be claimed by a producer.
    head: AtomicU64,
    /// Next slot index to be claimed by a worker.
    tail: AtomicU64,
    /// Signaled when an envelope has been enqueued.
    ready: Notify,
}

impl RingBufferChannel {
    /// Creates a ring with the given capacity. The capacity must be a
    /// non-zero power of two (validated by `BusConfig`).
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two() && capacity > 0);
        let slots = (0..capacity)
            .map(|_| Mutex::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: capacity as u64 - 1,
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            ready: Notify::new(),
        }
    }

    /// Returns the ring capacity.
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of enqueued envelopes (racy, for diagnostics).
    pub(crate) fn len(&self) -> usize {
        let head = self.head.load(Ordering::SeqCst);
        let tail = self.tail.load(Ordering::SeqCst);
        head.saturating_sub(tail) as usize
    }

    /// Attempts a non-suspending insertion.
    ///
    /// On a full ring the envelope is handed back so the caller can decide
    /// between retrying (suspending publish) and the direct-broadcast
    /// fallback (immediate publish).
    pub(crate) fn try_push(&self, envelope: EventEnvelope) -> Result<(), EventEnvelope> {
        loop {
            let head = self.head.load(Ordering::SeqCst);
            let tail = self.tail.load(Ordering::SeqCst);
            if head.wrapping_sub(tail) >= self.slots.len() as u64 {
                return Err(envelope);
            }
            if self
                .head
                .compare_exchange_weak(head, head + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                let idx = (head & self.mask) as usize;
                *self.slots[idx].lock() = Some(envelope);
                self.ready.notify_one();
                return Ok(());
            }
        }
    }

    /// Claims the next envelope without suspending.
    ///
    /// Returns `None` when the ring is empty. When a slot index is won,
    /// the claim spins for the producer that is still writing that slot;
    /// the window is a handful of instructions.
    pub(crate) fn try_claim(&self) -> Option<EventEnvelope> {
        loop {
            let tail = self.tail.load(Ordering::SeqCst);
            let head = self.head.load(Ordering::SeqCst);
            if tail >= head {
                return None;
            }
            if self
                .tail
                .compare_exchange_weak(tail, tail + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                let idx = (tail & self.mask) as usize;
                loop {
                    if let Some(envelope) = self.slots[idx].lock().take() {
                        return Some(envelope);
                    }
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Claims the next envelope, suspending the calling task while the
    /// ring is empty.
    pub(crate) async fn pop(&self) -> EventEnvelope {
        loop {
            if let Some(envelope) = self.try_claim() {
                return envelope;
            }
            self.ready.notified().await;
        }
    }

    /// Discards all pending envelopes.
    ///
    /// Only called during shutdown, after producers and workers have
    /// stopped; pending envelopes are dropped, not delivered.
    pub(crate) fn clear(&self) {
        while self.try_claim().is_some() {}
    }
}

impl std::fmt::Debug for RingBufferChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBufferChannel")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

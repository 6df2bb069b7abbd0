//! Internal event envelope held in ring buffer slots.

use crate::event::{Event, Priority};
use std::time::Instant;

/// An event queued for dispatch, together with its publish priority and
/// enqueue time.
///
/// Envelopes are created on publish and destroyed after dispatch. A slot's
/// envelope is owned exclusively by the producer that claimed the slot
/// until a worker claims it back.
#[derive(Debug, Clone)]
pub(crate) struct EventEnvelope {
    /// The published event.
    pub event: Event,
    /// Publish priority (carried for diagnostics; handler ordering uses
    /// binding priorities).
    pub priority: Priority,
    /// When the envelope entered the ring.
    pub enqueued_at: Instant,
}

impl EventEnvelope {
    /// Wraps an event for enqueueing.
    pub(crate) fn new(event: Event, priority: Priority) -> Self {
        Self {
            event,
            priority,
            enqueued_at: Instant::now(),
        }
    }
}

//! Dispatch worker pool and stats sampler.
//!
//! A fixed pool of worker tasks races to claim envelopes from the ring in
//! strict enqueue order (the claim itself is one atomic increment; only the
//! processing of already-claimed envelopes overlaps). Each claimed event is
//! first broadcast to the shared subscription stream, then delivered to the
//! registry's matching handlers in descending priority order.

use crate::registry::SubscriberRegistry;
use crate::ring::RingBufferChannel;
use crate::stats::BusStats;
use crate::Event;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Interval at which the per-second processing rate is recomputed.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Spawns the dispatch workers. Returns their join handles.
pub(crate) fn spawn_workers(
    worker_count: usize,
    ring: Arc<RingBufferChannel>,
    stream_tx: broadcast::Sender<Event>,
    registry: Arc<SubscriberRegistry>,
    stats: Arc<BusStats>,
    shutdown: &watch::Sender<bool>,
) -> Vec<JoinHandle<()>> {
    (0..worker_count)
        .map(|worker| {
            let ring = Arc::clone(&ring);
            let stream_tx = stream_tx.clone();
            let registry = Arc::clone(&registry);
            let stats = Arc::clone(&stats);
            let mut shutdown = shutdown.subscribe();
            tokio::spawn(async move {
                debug!(worker, "dispatch worker started");
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        envelope = ring.pop() => {
                            dispatch(&envelope.event, &stream_tx, &registry);
                            stats.record_processed(envelope.enqueued_at.elapsed());
                        }
                    }
                }
                debug!(worker, "dispatch worker stopped");
            })
        })
        .collect()
}

/// Spawns the stats sampler task.
pub(crate) fn spawn_sampler(
    stats: Arc<BusStats>,
    shutdown: &watch::Sender<bool>,
) -> JoinHandle<()> {
    let mut shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut sample_point = 0u64;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    sample_point = stats.sample_rate(sample_point);
                }
            }
        }
    })
}

/// Delivers one event: shared-stream broadcast plus registry handlers.
pub(crate) fn dispatch(
    event: &Event,
    stream_tx: &broadcast::Sender<Event>,
    registry: &SubscriberRegistry,
) {
    // Standing subscriptions first. A send with no receivers is normal.
    if stream_tx.send(event.clone()).is_err() {
        trace!(event = %event.id(), "no stream subscribers");
    }

    // Registered handlers, highest binding priority first. A failing
    // handler is logged and skipped; it never stops the delivery pass.
    for handler in registry.handlers_for(event) {
        if let Err(error) = handler(event) {
            warn!(
                event = %event.id(),
                event_type = %event.event_type(),
                %error,
                "subscriber handler failed"
            );
        }
    }
}

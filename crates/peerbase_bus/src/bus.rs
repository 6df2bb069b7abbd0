//! Event bus facade and lifecycle.

use crate::config::BusConfig;
use crate::dispatch;
use crate::envelope::EventEnvelope;
use crate::error::{BusError, BusResult};
use crate::event::{Event, EventId, EventType, Priority};
use crate::registry::{EventBinding, SubscriberId, SubscriberRegistry};
use crate::ring::RingBufferChannel;
use crate::stats::{BusStats, BusStatsSnapshot};
use crate::subscribe::{EventStream, SubscriptionFilter};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Lifecycle state of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// Created but not yet initialized; publishing fails.
    Uninitialized,
    /// Workers and sampler running.
    Running,
    /// Shutdown in progress; publishing fails.
    ShuttingDown,
    /// Shut down; pending envelopes were dropped and registrations
    /// cleared. Terminal.
    Stopped,
}

struct BusInner {
    config: BusConfig,
    ring: Arc<RingBufferChannel>,
    registry: Arc<SubscriberRegistry>,
    stats: Arc<BusStats>,
    stream_tx: broadcast::Sender<Event>,
    state: RwLock<BusState>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for BusInner {
    fn drop(&mut self) {
        // Last handle gone without a shutdown call: abort the tasks so
        // they don't outlive the bus.
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// The in-process event bus.
///
/// Cheap to clone; all clones share one bus. Lifecycle:
/// `Uninitialized → Running → ShuttingDown → Stopped`.
///
/// # Example
///
/// ```rust,ignore
/// let bus = EventBus::new(BusConfig::default())?;
/// bus.initialize()?;
///
/// let mut stream = bus.subscribe("social.message");
/// bus.publish(Event::new("social.message.text", "chat"), Priority::NORMAL).await?;
/// let event = stream.recv().await;
///
/// bus.shutdown().await;
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a bus with the given configuration. No tasks are spawned
    /// until [`initialize`](Self::initialize).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: BusConfig) -> BusResult<Self> {
        config.validate()?;
        let (stream_tx, _) = broadcast::channel(config.stream_capacity);
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(BusInner {
                ring: Arc::new(RingBufferChannel::new(config.ring_capacity)),
                registry: Arc::new(SubscriberRegistry::new()),
                stats: Arc::new(BusStats::new()),
                stream_tx,
                state: RwLock::new(BusState::Uninitialized),
                shutdown_tx,
                tasks: Mutex::new(Vec::new()),
                config,
            }),
        })
    }

    /// Creates a bus with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BusConfig::default()).expect("default configuration is valid")
    }

    /// Spawns the dispatch workers and the stats sampler.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::AlreadyInitialized`] if the bus has left the
    /// uninitialized state.
    pub fn initialize(&self) -> BusResult<()> {
        let inner = &self.inner;
        let mut state = inner.state.write();
        if *state != BusState::Uninitialized {
            return Err(BusError::AlreadyInitialized);
        }

        let mut tasks = dispatch::spawn_workers(
            inner.config.worker_count,
            Arc::clone(&inner.ring),
            inner.stream_tx.clone(),
            Arc::clone(&inner.registry),
            Arc::clone(&inner.stats),
            &inner.shutdown_tx,
        );
        tasks.push(dispatch::spawn_sampler(
            Arc::clone(&inner.stats),
            &inner.shutdown_tx,
        ));
        *inner.tasks.lock() = tasks;

        *state = BusState::Running;
        debug!(
            workers = inner.config.worker_count,
            capacity = inner.config.ring_capacity,
            "event bus running"
        );
        Ok(())
    }

    /// Publishes an event, suspending while the ring buffer is full.
    ///
    /// The call returns as soon as the envelope occupies a ring slot;
    /// delivery is fire-and-forget. Backpressure is expressed as
    /// suspension on a fixed retry backoff, never as an error and never by
    /// blocking an OS thread.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NotRunning`] if the bus is not running (also
    /// when shutdown begins while the publish is waiting for a slot).
    pub async fn publish(&self, event: Event, priority: Priority) -> BusResult<EventId> {
        let id = event.id().clone();
        let mut envelope = EventEnvelope::new(event, priority);
        loop {
            self.ensure_running()?;
            match self.inner.ring.try_push(envelope) {
                Ok(()) => {
                    self.inner.stats.record_published();
                    return Ok(id);
                }
                Err(back) => {
                    envelope = back;
                    tokio::time::sleep(self.inner.config.publish_retry).await;
                }
            }
        }
    }

    /// Publishes an event without ever suspending.
    ///
    /// On a full ring buffer the event is broadcast directly into the
    /// shared subscription stream, bypassing the ring and the
    /// per-subscriber delivery pass for this one event. That trades strict
    /// ordering (and handler delivery) for the non-blocking guarantee; the
    /// event still counts as published.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NotRunning`] if the bus is not running.
    pub fn publish_immediate(&self, event: Event, priority: Priority) -> BusResult<EventId> {
        self.ensure_running()?;
        let id = event.id().clone();
        match self.inner.ring.try_push(EventEnvelope::new(event, priority)) {
            Ok(()) => {}
            Err(envelope) => {
                warn!(
                    event = %id,
                    "ring buffer full, broadcasting directly to shared stream"
                );
                if self.inner.stream_tx.send(envelope.event).is_err() {
                    debug!(event = %id, "no stream subscribers for overflow event");
                }
                self.inner.stats.record_direct_broadcast();
            }
        }
        self.inner.stats.record_published();
        Ok(id)
    }

    /// Subscribes to a single event type (subtypes included).
    #[must_use]
    pub fn subscribe(&self, event_type: impl Into<EventType>) -> EventStream {
        self.stream(SubscriptionFilter::Single(event_type.into()))
    }

    /// Subscribes to multiple event types (subtypes included).
    #[must_use]
    pub fn subscribe_types(&self, event_types: Vec<EventType>) -> EventStream {
        self.stream(SubscriptionFilter::Multi(event_types))
    }

    /// Subscribes with an arbitrary predicate.
    #[must_use]
    pub fn subscribe_filtered(
        &self,
        predicate: impl Fn(&Event) -> bool + Send + Sync + 'static,
    ) -> EventStream {
        self.stream(SubscriptionFilter::Predicate(Arc::new(predicate)))
    }

    fn stream(&self, filter: SubscriptionFilter) -> EventStream {
        EventStream::new(self.inner.stream_tx.subscribe(), filter)
    }

    /// Registers a subscriber with its handler bindings.
    ///
    /// Returns `false` if the id is already registered.
    pub fn register_subscriber(&self, id: SubscriberId, bindings: Vec<EventBinding>) -> bool {
        self.inner.registry.register(id, bindings)
    }

    /// Unregisters a subscriber. Returns `false` if the id is unknown.
    pub fn unregister_subscriber(&self, id: &SubscriberId) -> bool {
        self.inner.registry.unregister(id)
    }

    /// Returns the number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.subscriber_count()
    }

    /// Returns a snapshot of the bus counters without blocking producers
    /// or workers.
    #[must_use]
    pub fn stats(&self) -> BusStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BusState {
        *self.inner.state.read()
    }

    /// Returns the number of envelopes waiting in the ring buffer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.ring.len()
    }

    /// Shuts the bus down.
    ///
    /// Cancels the workers and the sampler, drops any envelopes still in
    /// the ring buffer (delivery is best-effort, not durable), and clears
    /// all subscriber registrations. Idempotent: calling it on a bus that
    /// is not running is a no-op.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.write();
            if *state != BusState::Running {
                return;
            }
            *state = BusState::ShuttingDown;
        }

        let _ = self.inner.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        let dropped = self.inner.ring.len();
        self.inner.ring.clear();
        self.inner.registry.clear();
        *self.inner.state.write() = BusState::Stopped;
        debug!(dropped, "event bus stopped");
    }

    fn ensure_running(&self) -> BusResult<()> {
        if *self.inner.state.read() == BusState::Running {
            Ok(())
        } else {
            Err(BusError::NotRunning)
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("state", &self.state())
            .field("pending", &self.pending())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

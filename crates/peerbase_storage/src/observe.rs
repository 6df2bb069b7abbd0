//! Change notification streams.
//!
//! Observers subscribe to an exact key or a key prefix within one
//! collection. All observers of the same key (or prefix) share a single
//! broadcast channel; channels whose receivers are all gone are pruned on
//! the next notify pass. New observers never see a gap between "subscribe"
//! and "current state": the stream's first emissions are the current value
//! (or the currently matching set), before any live update.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

/// Buffer depth of each observation channel. A slow observer loses its
/// oldest backlog rather than blocking writers.
const OBSERVE_BUFFER: usize = 64;

/// What changed about an observed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// The entry was written; carries the new value bytes.
    Put(Vec<u8>),
    /// The entry was removed.
    Delete,
}

/// A change to a stored entry, as delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    /// The collection the entry belongs to.
    pub collection: String,
    /// The entry key.
    pub key: String,
    /// What happened.
    pub change: ChangeKind,
    /// When it happened, epoch millis.
    pub at: u64,
}

type ChannelMap = Mutex<HashMap<(String, String), broadcast::Sender<ChangeNotification>>>;

/// Fan-out point for change notifications.
#[derive(Default)]
pub(crate) struct NotificationHub {
    /// Channels keyed by (collection, exact key).
    exact: ChannelMap,
    /// Channels keyed by (collection, key prefix).
    prefixes: ChannelMap,
}

impl NotificationHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Subscribes to changes of one exact key.
    pub(crate) fn subscribe_exact(
        &self,
        collection: &str,
        key: &str,
    ) -> broadcast::Receiver<ChangeNotification> {
        Self::subscribe(&self.exact, collection, key)
    }

    /// Subscribes to changes of all keys with the given prefix.
    pub(crate) fn subscribe_prefix(
        &self,
        collection: &str,
        prefix: &str,
    ) -> broadcast::Receiver<ChangeNotification> {
        Self::subscribe(&self.prefixes, collection, prefix)
    }

    fn subscribe(
        map: &ChannelMap,
        collection: &str,
        pattern: &str,
    ) -> broadcast::Receiver<ChangeNotification> {
        let mut map = map.lock();
        map.entry((collection.to_string(), pattern.to_string()))
            .or_insert_with(|| broadcast::channel(OBSERVE_BUFFER).0)
            .subscribe()
    }

    /// Delivers a notification to the exact-key channel and every matching
    /// prefix channel. Channels without receivers are dropped.
    pub(crate) fn notify(&self, notification: &ChangeNotification) {
        {
            let mut exact = self.exact.lock();
            let channel_key = (notification.collection.clone(), notification.key.clone());
            if let Some(tx) = exact.get(&channel_key) {
                if tx.send(notification.clone()).is_err() {
                    exact.remove(&channel_key);
                    debug!(
                        collection = %notification.collection,
                        key = %notification.key,
                        "pruned observer channel without receivers"
                    );
                }
            }
        }
        {
            let mut prefixes = self.prefixes.lock();
            prefixes.retain(|(collection, prefix), tx| {
                if collection != &notification.collection
                    || !notification.key.starts_with(prefix.as_str())
                {
                    return true;
                }
                tx.send(notification.clone()).is_ok() || tx.receiver_count() > 0
            });
        }
    }

    /// Number of live observation channels.
    #[cfg(test)]
    pub(crate) fn channel_count(&self) -> usize {
        self.exact.lock().len() + self.prefixes.lock().len()
    }
}

/// A stream of [`ChangeNotification`]s for one observed key or prefix.
///
/// The first emissions replay the observed state at subscription time
/// (cold-start emission); everything after is a live update.
pub struct ObserveStream {
    initial: VecDeque<ChangeNotification>,
    live: BroadcastStream<ChangeNotification>,
}

impl std::fmt::Debug for ObserveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserveStream")
            .field("initial", &self.initial.len())
            .finish_non_exhaustive()
    }
}

impl ObserveStream {
    pub(crate) fn new(
        initial: Vec<ChangeNotification>,
        receiver: broadcast::Receiver<ChangeNotification>,
    ) -> Self {
        Self {
            initial: initial.into(),
            live: BroadcastStream::new(receiver),
        }
    }

    /// Receives the next notification.
    ///
    /// Returns `None` once the engine has shut down and the backlog is
    /// drained.
    pub async fn recv(&mut self) -> Option<ChangeNotification> {
        self.next().await
    }
}

impl Stream for ObserveStream {
    type Item = ChangeNotification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(initial) = self.initial.pop_front() {
            return Poll::Ready(Some(initial));
        }
        loop {
            match Pin::new(&mut self.live).poll_next(cx) {
                Poll::Ready(Some(Ok(notification))) => return Poll::Ready(Some(notification)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(missed)))) => {
                    debug!(missed, "observer lagged, oldest notifications dropped");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

//! Flow-style subscriptions over the shared broadcast stream.

use crate::event::{Event, EventType};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

/// Selection criteria for a subscription.
pub(crate) enum SubscriptionFilter {
    /// Events of one type (subtypes included).
    Single(EventType),
    /// Events of any of the listed types (subtypes included).
    Multi(Vec<EventType>),
    /// Events matching an arbitrary predicate.
    Predicate(Arc<dyn Fn(&Event) -> bool + Send + Sync>),
}

impl SubscriptionFilter {
    fn matches(&self, event: &Event) -> bool {
        match self {
            Self::Single(declared) => event.event_type().is_subtype_of(declared),
            Self::Multi(declared) => declared
                .iter()
                .any(|t| event.event_type().is_subtype_of(t)),
            Self::Predicate(predicate) => predicate(event),
        }
    }
}

impl fmt::Debug for SubscriptionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(t) => f.debug_tuple("Single").field(t).finish(),
            Self::Multi(ts) => f.debug_tuple("Multi").field(ts).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// A stream of events matching a subscription.
///
/// Every dispatched event is broadcast to all standing subscriptions; this
/// stream filters down to the subscribed criteria. A slow consumer loses
/// the oldest events of its backlog (the workers never block on a
/// subscriber); the gap is logged and skipped.
pub struct EventStream {
    inner: BroadcastStream<Event>,
    filter: SubscriptionFilter,
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl EventStream {
    pub(crate) fn new(receiver: broadcast::Receiver<Event>, filter: SubscriptionFilter) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
            filter,
        }
    }

    /// Receives the next matching event.
    ///
    /// Returns `None` once the bus has shut down and the backlog is
    /// drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.next().await
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if self.filter.matches(&event) {
                        return Poll::Ready(Some(event));
                    }
                    // Non-matching event: keep draining.
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(missed)))) => {
                    debug!(missed, "subscription lagged, oldest events dropped");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_pair(filter: SubscriptionFilter) -> (broadcast::Sender<Event>, EventStream) {
        let (tx, rx) = broadcast::channel(16);
        (tx, EventStream::new(rx, filter))
    }

    #[tokio::test]
    async fn single_type_filter_includes_subtypes() {
        let (tx, mut stream) =
            stream_pair(SubscriptionFilter::Single(EventType::new("social.message")));

        tx.send(Event::new("net.peer.connected", "t")).unwrap();
        tx.send(Event::new("social.message.text", "t")).unwrap();

        let received = stream.recv().await.unwrap();
        assert_eq!(received.event_type().as_str(), "social.message.text");
    }

    #[tokio::test]
    async fn multi_type_filter() {
        let (tx, mut stream) = stream_pair(SubscriptionFilter::Multi(vec![
            EventType::new("a"),
            EventType::new("b"),
        ]));

        tx.send(Event::new("c.x", "t")).unwrap();
        tx.send(Event::new("b.y", "t")).unwrap();
        tx.send(Event::new("a", "t")).unwrap();

        assert_eq!(stream.recv().await.unwrap().event_type().as_str(), "b.y");
        assert_eq!(stream.recv().await.unwrap().event_type().as_str(), "a");
    }

    #[tokio::test]
    async fn predicate_filter() {
        let (tx, mut stream) = stream_pair(SubscriptionFilter::Predicate(Arc::new(|e| {
            e.metadata_value("important") == Some("yes")
        })));

        tx.send(Event::new("x", "t")).unwrap();
        tx.send(Event::new("y", "t").with_metadata("important", "yes"))
            .unwrap();

        assert_eq!(stream.recv().await.unwrap().event_type().as_str(), "y");
    }

    #[tokio::test]
    async fn stream_ends_when_sender_dropped() {
        let (tx, mut stream) = stream_pair(SubscriptionFilter::Single(EventType::new("x")));
        drop(tx);
        assert!(stream.recv().await.is_none());
    }
}

//! Subscriber registry: explicit `(event type, priority, handler)` bindings.
//!
//! Registration is explicit rather than reflective: callers hand the
//! registry the full list of bindings for a subscriber. Bindings are fixed
//! at registration time; the only mutations are whole-subscriber
//! registration and unregistration.

use crate::error::HandlerError;
use crate::event::{Event, EventType, Priority};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Opaque subscriber handle. Uniqueness is by value; registering the same
/// id twice is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(String);

impl SubscriberId {
    /// Creates a subscriber id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriberId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A subscriber callback.
///
/// Handlers run on dispatch workers; a failing handler is logged and
/// skipped without affecting other handlers.
pub type EventHandler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

/// One `(event type, priority, handler)` binding of a subscriber.
#[derive(Clone)]
pub struct EventBinding {
    event_type: EventType,
    priority: Priority,
    handler: EventHandler,
}

impl EventBinding {
    /// Creates a binding. The handler fires for events whose concrete type
    /// equals `event_type` or is one of its dot-segment subtypes.
    pub fn new(
        event_type: impl Into<EventType>,
        priority: Priority,
        handler: impl Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            priority,
            handler: Arc::new(handler),
        }
    }

    /// Returns the declared event type.
    #[must_use]
    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    /// Returns the binding priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }
}

impl fmt::Debug for EventBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBinding")
            .field("event_type", &self.event_type)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

struct SubscriberEntry {
    id: SubscriberId,
    bindings: Vec<EventBinding>,
}

/// Maps subscriber handles to their bindings and selects handlers for
/// delivery.
///
/// A single coarse mutex covers registration, unregistration, and the
/// per-event binding scan; registration changes are rare relative to
/// dispatch, and handlers are cloned out before invocation so they may
/// re-enter the registry.
#[derive(Default)]
pub struct SubscriberRegistry {
    entries: Mutex<Vec<SubscriberEntry>>,
}

impl SubscriberRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber with its bindings.
    ///
    /// Returns `false` (and logs a warning) if the id is already
    /// registered; the existing bindings are left untouched.
    pub fn register(&self, id: SubscriberId, bindings: Vec<EventBinding>) -> bool {
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.id == id) {
            warn!(subscriber = %id, "duplicate subscriber registration ignored");
            return false;
        }
        entries.push(SubscriberEntry { id, bindings });
        true
    }

    /// Removes all bindings for a subscriber.
    ///
    /// Returns `false` (and logs a warning) if the id is unknown.
    pub fn unregister(&self, id: &SubscriberId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| &e.id != id);
        if entries.len() == before {
            warn!(subscriber = %id, "unregister of unknown subscriber ignored");
            return false;
        }
        true
    }

    /// Returns the number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Removes every registration.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Collects the handlers eligible for `event`, ordered by descending
    /// binding priority. Ties keep registration order (stable sort).
    pub(crate) fn handlers_for(&self, event: &Event) -> Vec<EventHandler> {
        let entries = self.entries.lock();
        let mut matched: Vec<(Priority, EventHandler)> = Vec::new();
        for entry in entries.iter() {
            for binding in &entry.bindings {
                if event.event_type().is_subtype_of(&binding.event_type) {
                    matched.push((binding.priority, Arc::clone(&binding.handler)));
                }
            }
        }
        matched.sort_by_key(|(priority, _)| std::cmp::Reverse(*priority));
        matched.into_iter().map(|(_, handler)| handler).collect()
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop_binding(event_type: &str, priority: u8) -> EventBinding {
        EventBinding::new(event_type, Priority::new(priority), |_| Ok(()))
    }

    #[test]
    fn register_and_unregister() {
        let registry = SubscriberRegistry::new();
        let id = SubscriberId::new("peer-sync");

        assert!(registry.register(id.clone(), vec![noop_binding("net.peer", 5)]));
        assert_eq!(registry.subscriber_count(), 1);

        assert!(registry.unregister(&id));
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = SubscriberRegistry::new();
        let id = SubscriberId::new("dup");

        assert!(registry.register(id.clone(), vec![noop_binding("a", 1)]));
        assert!(!registry.register(id, vec![noop_binding("b", 2)]));
        assert_eq!(registry.subscriber_count(), 1);
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let registry = SubscriberRegistry::new();
        assert!(!registry.unregister(&SubscriberId::new("ghost")));
    }

    #[test]
    fn handlers_ordered_by_descending_priority() {
        let registry = SubscriberRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let binding = |tag: &'static str, priority: u8| {
            let calls = Arc::clone(&calls);
            EventBinding::new("job", Priority::new(priority), move |_| {
                calls.lock().push(tag);
                Ok(())
            })
        };

        registry.register(
            SubscriberId::new("worker"),
            vec![binding("low", 0), binding("high", 10), binding("mid", 5)],
        );

        let event = Event::new("job", "test");
        for handler in registry.handlers_for(&event) {
            handler(&event).unwrap();
        }

        assert_eq!(*calls.lock(), vec!["high", "mid", "low"]);
    }

    #[test]
    fn priority_ties_keep_registration_order() {
        let registry = SubscriberRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let calls = Arc::clone(&calls);
            registry.register(
                SubscriberId::new(tag),
                vec![EventBinding::new("tick", Priority::NORMAL, move |_| {
                    calls.lock().push(tag);
                    Ok(())
                })],
            );
        }

        let event = Event::new("tick", "test");
        for handler in registry.handlers_for(&event) {
            handler(&event).unwrap();
        }

        assert_eq!(*calls.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn bindings_match_subtypes() {
        let registry = SubscriberRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = Arc::clone(&hits);
        registry.register(
            SubscriberId::new("social"),
            vec![EventBinding::new(
                "social.message",
                Priority::NORMAL,
                move |_| {
                    hits_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )],
        );

        let text = Event::new("social.message.text", "chat");
        let presence = Event::new("social.presence", "chat");

        assert_eq!(registry.handlers_for(&text).len(), 1);
        assert_eq!(registry.handlers_for(&presence).len(), 0);
    }
}

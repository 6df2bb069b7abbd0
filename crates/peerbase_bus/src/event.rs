//! Event model: identifiers, hierarchical types, and the event record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Returns the current time as milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A globally unique event identifier.
///
/// Ids are monotonic-ish: a millisecond timestamp followed by a random
/// suffix, so sorting ids roughly sorts events by creation time while
/// collisions within one millisecond stay impossible in practice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    /// Generates a fresh identifier.
    pub(crate) fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", now_millis(), &suffix[..8]))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A hierarchical, dot-separated event type such as `social.message.text`.
///
/// Types form a tree: `social.message.text` is a subtype of
/// `social.message`, which is a subtype of `social`. Subscriber bindings
/// declared for a parent type match events of any of its subtypes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventType(String);

impl EventType {
    /// Creates an event type from a dot-separated path.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Returns the type as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when `self` equals `parent` or extends it by one or
    /// more dot segments.
    #[must_use]
    pub fn is_subtype_of(&self, parent: &EventType) -> bool {
        self.0 == parent.0
            || (self.0.len() > parent.0.len()
                && self.0.starts_with(parent.0.as_str())
                && self.0.as_bytes()[parent.0.len()] == b'.')
    }
}

impl From<&str> for EventType {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Delivery priority, clamped to `0..=10`.
///
/// Priority orders handler invocation within a single event's delivery
/// pass; it does not reorder events in the ring buffer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Priority(u8);

impl Priority {
    /// Lowest priority.
    pub const MIN: Priority = Priority(0);
    /// Default priority.
    pub const NORMAL: Priority = Priority(5);
    /// Highest priority.
    pub const MAX: Priority = Priority(10);

    /// Creates a priority, clamping values above 10.
    #[must_use]
    pub fn new(value: u8) -> Self {
        Self(value.min(Self::MAX.0))
    }

    /// Returns the numeric value.
    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// An immutable event record.
///
/// Events are plain values: producers construct them, the bus routes them
/// by [`EventType`], and subscribers receive clones. Identity is carried
/// by [`EventId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    event_type: EventType,
    timestamp: u64,
    source: String,
    metadata: BTreeMap<String, String>,
}

impl Event {
    /// Creates an event with a fresh id and the current timestamp.
    pub fn new(event_type: impl Into<EventType>, source: impl Into<String>) -> Self {
        Self {
            id: EventId::generate(),
            event_type: event_type.into(),
            timestamp: now_millis(),
            source: source.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Adds a metadata entry, consuming and returning the event.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the event identifier.
    #[must_use]
    pub fn id(&self) -> &EventId {
        &self.id
    }

    /// Returns the hierarchical event type.
    #[must_use]
    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    /// Returns the creation timestamp in epoch milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Returns the id of the originating component.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the metadata map.
    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Looks up a single metadata value.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

impl From<&str> for EventId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

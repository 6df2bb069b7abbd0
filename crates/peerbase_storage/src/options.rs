//! Collection options and metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Options attached to a collection when it is opened.
///
/// Options are persisted alongside the collection's metadata row. TTL is
/// evaluated with the options in effect for the currently open handle, so
/// re-opening a collection with a different `ttl_seconds` changes the
/// expiry of already-written rows as well as new ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageOptions {
    /// Whether the host encrypts values before handing them to storage.
    /// The engine stores bytes as given; the flag travels with the
    /// collection so readers know what they are looking at.
    pub encrypted: bool,

    /// Whether the host compresses values before handing them to storage.
    pub compression_enabled: bool,

    /// Whether each write is flushed to durable storage immediately.
    pub auto_flush: bool,

    /// Per-entry time-to-live in seconds. `None` disables expiry.
    pub ttl_seconds: Option<u32>,

    /// Free-form options for host integrations.
    pub custom: BTreeMap<String, String>,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            encrypted: false,
            compression_enabled: false,
            auto_flush: true,
            ttl_seconds: None,
            custom: BTreeMap::new(),
        }
    }
}

impl StorageOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-entry TTL in seconds.
    #[must_use]
    pub fn ttl_seconds(mut self, secs: u32) -> Self {
        self.ttl_seconds = Some(secs);
        self
    }

    /// Marks values as host-encrypted.
    #[must_use]
    pub const fn encrypted(mut self, value: bool) -> Self {
        self.encrypted = value;
        self
    }

    /// Marks values as host-compressed.
    #[must_use]
    pub const fn compression_enabled(mut self, value: bool) -> Self {
        self.compression_enabled = value;
        self
    }

    /// Sets whether each write flushes immediately.
    #[must_use]
    pub const fn auto_flush(mut self, value: bool) -> Self {
        self.auto_flush = value;
        self
    }

    /// Adds a custom option entry.
    #[must_use]
    pub fn custom_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }
}

/// Persisted per-collection metadata.
///
/// The existence of a metadata row is the source of truth for "collection
/// exists"; entry rows without one are never handed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    /// Collection name, unique within the engine.
    pub name: String,
    /// Options in effect for the collection.
    pub options: StorageOptions,
    /// Creation time, epoch millis.
    pub created_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = StorageOptions::default();
        assert!(!options.encrypted);
        assert!(options.auto_flush);
        assert!(options.ttl_seconds.is_none());
    }

    #[test]
    fn builder_pattern() {
        let options = StorageOptions::new()
            .ttl_seconds(60)
            .encrypted(true)
            .auto_flush(false)
            .custom_option("owner", "sync");

        assert_eq!(options.ttl_seconds, Some(60));
        assert!(options.encrypted);
        assert!(!options.auto_flush);
        assert_eq!(options.custom.get("owner").map(String::as_str), Some("sync"));
    }

    #[test]
    fn metadata_roundtrips_through_json() {
        let meta = CollectionMetadata {
            name: "profiles".into(),
            options: StorageOptions::new().ttl_seconds(30),
            created_at: 1234,
        };
        let json = serde_json::to_string(&meta).unwrap();
        let back: CollectionMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}

//! Namespaced collection handle.

use crate::engine::EngineInner;
use crate::error::{StorageError, StorageResult};
use crate::observe::{ChangeKind, ChangeNotification, ObserveStream};
use crate::options::StorageOptions;
use peerbase_codec::{Decode, Encode};
use std::sync::Arc;

/// A namespaced view into the storage engine, scoped to one collection.
///
/// Handles are cheap to clone and share the engine. A handle is
/// invalidated by a snapshot restore ([`StorageError::StaleHandle`]) and
/// by engine shutdown ([`StorageError::EngineClosed`]).
///
/// All reads apply the collection's TTL: an expired entry is absent from
/// `get`/`contains`/`count`/`keys`/`find_by_prefix` results.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<EngineInner>,
    name: String,
    generation: u64,
}

impl Collection {
    pub(crate) fn new(inner: Arc<EngineInner>, name: String, generation: u64) -> Self {
        Self {
            inner,
            name,
            generation,
        }
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the options currently in effect for this collection.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CollectionNotFound`] if the collection has
    /// been deleted.
    pub fn options(&self) -> StorageResult<StorageOptions> {
        self.check()?;
        self.inner
            .options_of(&self.name)
            .ok_or_else(|| StorageError::collection_not_found(&self.name))
    }

    /// Reads an entry's bytes.
    pub async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.check()?;
        self.inner.read_entry(&self.name, key)
    }

    /// Writes an entry, replacing any previous value and notifying
    /// observers.
    pub async fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.check()?;
        self.inner.write_entry(&self.name, key, value)
    }

    /// Removes an entry. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.check()?;
        self.inner.delete_entry(&self.name, key)
    }

    /// Returns whether a (non-expired) entry exists.
    pub async fn contains(&self, key: &str) -> StorageResult<bool> {
        self.check()?;
        Ok(self.inner.read_entry(&self.name, key)?.is_some())
    }

    /// Counts the live entries.
    pub async fn count(&self) -> StorageResult<usize> {
        self.check()?;
        Ok(self.inner.scan_live(&self.name, None)?.len())
    }

    /// Returns the keys of all live entries, ordered.
    pub async fn keys(&self) -> StorageResult<Vec<String>> {
        self.check()?;
        Ok(self
            .inner
            .scan_live(&self.name, None)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// Returns the live entries whose keys start with `prefix`, ordered
    /// by key.
    pub async fn find_by_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        self.check()?;
        self.inner.scan_live(&self.name, Some(prefix))
    }

    /// Reads and decodes a stored object.
    pub async fn get_object<T: Decode>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(T::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encodes and writes a stored object.
    pub async fn put_object<T: Encode>(&self, key: &str, object: &T) -> StorageResult<()> {
        let bytes = object.to_bytes()?;
        self.put(key, bytes).await
    }

    /// Observes one key.
    ///
    /// The stream's first emission is the key's current value (if any),
    /// so observers never see a gap between subscribing and the current
    /// state; subsequent emissions are live updates. All observers of the
    /// same key share one underlying channel.
    pub fn observe(&self, key: &str) -> StorageResult<ObserveStream> {
        self.check()?;
        // Subscribe before reading so no update can fall into the gap.
        let receiver = self.inner.hub.subscribe_exact(&self.name, key);
        let initial = self
            .inner
            .read_entry(&self.name, key)?
            .map(|value| ChangeNotification {
                collection: self.name.clone(),
                key: key.to_string(),
                change: ChangeKind::Put(value),
                at: self.inner.now(),
            })
            .into_iter()
            .collect();
        Ok(ObserveStream::new(initial, receiver))
    }

    /// Observes every key with the given prefix.
    ///
    /// The stream first emits one `Put` per currently matching entry,
    /// then live updates for any key under the prefix.
    pub fn observe_prefix(&self, prefix: &str) -> StorageResult<ObserveStream> {
        self.check()?;
        let receiver = self.inner.hub.subscribe_prefix(&self.name, prefix);
        let at = self.inner.now();
        let initial = self
            .inner
            .scan_live(&self.name, Some(prefix))?
            .into_iter()
            .map(|(key, value)| ChangeNotification {
                collection: self.name.clone(),
                key,
                change: ChangeKind::Put(value),
                at,
            })
            .collect();
        Ok(ObserveStream::new(initial, receiver))
    }

    fn check(&self) -> StorageResult<()> {
        self.inner.check_generation(self.generation)
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

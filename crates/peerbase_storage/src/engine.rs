//! Storage engine facade: collections, TTL, snapshots, transactions.

use crate::backend::{BackendKind, BatchOp, KvBackend, RedbBackend, SqliteBackend};
use crate::collection::Collection;
use crate::error::{StorageError, StorageResult};
use crate::observe::{ChangeKind, ChangeNotification, NotificationHub};
use crate::options::{CollectionMetadata, StorageOptions};
use crate::stats::StorageStats;
use crate::time::{SystemTimeSource, TimeSource};
use crate::transaction::StorageTransaction;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Configuration for opening a storage engine.
#[derive(Clone)]
pub struct EngineConfig {
    /// Directory holding the database file and snapshots.
    pub root: PathBuf,
    /// Which backing engine to run on.
    pub backend: BackendKind,
    /// How often the background sweeper physically deletes expired
    /// entries. `Duration::ZERO` disables the sweeper.
    pub sweep_interval: Duration,
    /// Clock used for write timestamps and TTL evaluation.
    pub time_source: Arc<dyn TimeSource>,
}

impl EngineConfig {
    /// Creates a configuration with default sweep interval and the system
    /// clock.
    pub fn new(root: impl Into<PathBuf>, backend: BackendKind) -> Self {
        Self {
            root: root.into(),
            backend,
            sweep_interval: Duration::from_secs(30),
            time_source: Arc::new(SystemTimeSource),
        }
    }

    /// Sets the sweeper interval. `Duration::ZERO` disables the sweeper.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Replaces the clock (tests inject a manual clock here).
    #[must_use]
    pub fn time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("root", &self.root)
            .field("backend", &self.backend)
            .field("sweep_interval", &self.sweep_interval)
            .finish_non_exhaustive()
    }
}

struct SnapshotHandle {
    path: PathBuf,
    created_at: u64,
}

pub(crate) struct EngineInner {
    config: EngineConfig,
    backend: RwLock<Option<Box<dyn KvBackend>>>,
    collections: RwLock<HashMap<String, CollectionMetadata>>,
    pub(crate) hub: NotificationHub,
    is_open: RwLock<bool>,
    /// Bumped on every snapshot restore; handles created before the bump
    /// are stale.
    generation: AtomicU64,
    active_txns: Mutex<HashSet<u64>>,
    next_txn_id: AtomicU64,
    next_snapshot_seq: AtomicU64,
    snapshots: Mutex<HashMap<String, SnapshotHandle>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl EngineInner {
    pub(crate) fn now(&self) -> u64 {
        self.config.time_source.now_millis()
    }

    pub(crate) fn ensure_open(&self) -> StorageResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(StorageError::EngineClosed)
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn check_generation(&self, generation: u64) -> StorageResult<()> {
        self.ensure_open()?;
        if generation == self.generation() {
            Ok(())
        } else {
            Err(StorageError::StaleHandle)
        }
    }

    fn with_backend<R>(
        &self,
        f: impl FnOnce(&dyn KvBackend) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let guard = self.backend.read();
        match guard.as_deref() {
            Some(backend) => f(backend),
            None => Err(StorageError::EngineClosed),
        }
    }

    pub(crate) fn options_of(&self, collection: &str) -> Option<StorageOptions> {
        self.collections.read().get(collection).map(|m| m.options.clone())
    }

    pub(crate) fn collection_exists(&self, collection: &str) -> bool {
        self.collections.read().contains_key(collection)
    }

    fn ttl_millis(&self, collection: &str) -> Option<u64> {
        self.collections
            .read()
            .get(collection)
            .and_then(|m| m.options.ttl_seconds)
            .map(|secs| u64::from(secs) * 1000)
    }

    fn is_expired(ttl_millis: Option<u64>, written_at: u64, now: u64) -> bool {
        match ttl_millis {
            Some(ttl) => now.saturating_sub(written_at) >= ttl,
            None => false,
        }
    }

    /// Reads one entry with TTL filtering. An expired row reads as absent
    /// and is deleted best-effort, without a notification.
    pub(crate) fn read_entry(
        &self,
        collection: &str,
        key: &str,
    ) -> StorageResult<Option<Vec<u8>>> {
        let ttl = self.ttl_millis(collection);
        let now = self.now();
        let stored = self.with_backend(|b| b.get(collection, key))?;
        match stored {
            Some(v) if Self::is_expired(ttl, v.written_at, now) => {
                if let Err(e) = self.with_backend(|b| b.delete(collection, key)) {
                    warn!(collection, key, error = %e, "failed to drop expired entry");
                }
                Ok(None)
            }
            Some(v) => Ok(Some(v.value)),
            None => Ok(None),
        }
    }

    /// Writes one entry and notifies observers.
    pub(crate) fn write_entry(
        &self,
        collection: &str,
        key: &str,
        value: Vec<u8>,
    ) -> StorageResult<()> {
        let options = self
            .options_of(collection)
            .ok_or_else(|| StorageError::collection_not_found(collection))?;
        let now = self.now();
        self.with_backend(|b| {
            b.put(collection, key, &value, now)?;
            if options.auto_flush {
                b.flush()?;
            }
            Ok(())
        })?;
        self.hub.notify(&ChangeNotification {
            collection: collection.to_string(),
            key: key.to_string(),
            change: ChangeKind::Put(value),
            at: now,
        });
        Ok(())
    }

    /// Deletes one entry, notifying observers if it existed.
    pub(crate) fn delete_entry(&self, collection: &str, key: &str) -> StorageResult<bool> {
        let existed = self.with_backend(|b| b.delete(collection, key))?;
        if existed {
            self.hub.notify(&ChangeNotification {
                collection: collection.to_string(),
                key: key.to_string(),
                change: ChangeKind::Delete,
                at: self.now(),
            });
        }
        Ok(existed)
    }

    /// Scans a collection (optionally under a key prefix), filtering
    /// expired rows. Discovered expired rows are deleted best-effort in
    /// one batch.
    pub(crate) fn scan_live(
        &self,
        collection: &str,
        prefix: Option<&str>,
    ) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let ttl = self.ttl_millis(collection);
        let now = self.now();
        let rows = self.with_backend(|b| match prefix {
            Some(prefix) => b.scan_prefix(collection, prefix),
            None => b.scan_collection(collection),
        })?;

        let mut live = Vec::new();
        let mut expired = Vec::new();
        for (key, stored) in rows {
            if Self::is_expired(ttl, stored.written_at, now) {
                expired.push(key);
            } else {
                live.push((key, stored.value));
            }
        }
        if !expired.is_empty() {
            let ops: Vec<BatchOp> = expired
                .into_iter()
                .map(|key| BatchOp::Delete {
                    collection: collection.to_string(),
                    key,
                })
                .collect();
            if let Err(e) = self.with_backend(|b| b.apply_batch(&ops)) {
                warn!(collection, error = %e, "failed to drop expired entries");
            }
        }
        Ok(live)
    }

    /// Applies a transaction's buffered writes atomically, then fires one
    /// notification per distinct (collection, key), last writer wins.
    pub(crate) fn commit_batch(
        &self,
        writes: Vec<(String, String, Option<Vec<u8>>)>,
    ) -> StorageResult<()> {
        // Every touched collection must exist before anything is applied.
        for (collection, _, _) in &writes {
            if !self.collection_exists(collection) {
                return Err(StorageError::collection_not_found(collection.clone()));
            }
        }

        let now = self.now();
        let batch: Vec<BatchOp> = writes
            .iter()
            .map(|(collection, key, value)| match value {
                Some(value) => BatchOp::Put {
                    collection: collection.clone(),
                    key: key.clone(),
                    value: value.clone(),
                    written_at: now,
                },
                None => BatchOp::Delete {
                    collection: collection.clone(),
                    key: key.clone(),
                },
            })
            .collect();
        self.with_backend(|b| b.apply_batch(&batch))?;

        // Last write per key wins the notification; order of first touch
        // is preserved.
        let mut order: Vec<(String, String)> = Vec::new();
        let mut last: HashMap<(String, String), Option<Vec<u8>>> = HashMap::new();
        for (collection, key, value) in writes {
            let entry = (collection, key);
            if !last.contains_key(&entry) {
                order.push(entry.clone());
            }
            last.insert(entry, value);
        }
        for entry in order {
            let value = last.remove(&entry).unwrap_or(None);
            let (collection, key) = entry;
            self.hub.notify(&ChangeNotification {
                collection,
                key,
                change: match value {
                    Some(value) => ChangeKind::Put(value),
                    None => ChangeKind::Delete,
                },
                at: now,
            });
        }
        Ok(())
    }

    pub(crate) fn unregister_txn(&self, id: u64) {
        self.active_txns.lock().remove(&id);
    }

    pub(crate) fn txn_is_active(&self, id: u64) -> bool {
        self.active_txns.lock().contains(&id)
    }

    /// Physically deletes expired entries across all TTL collections.
    fn sweep_expired(&self) -> StorageResult<u64> {
        let ttl_collections: Vec<String> = {
            let collections = self.collections.read();
            collections
                .values()
                .filter(|m| m.options.ttl_seconds.is_some())
                .map(|m| m.name.clone())
                .collect()
        };

        let mut removed = 0u64;
        for collection in ttl_collections {
            let ttl = self.ttl_millis(&collection);
            let now = self.now();
            let rows = self.with_backend(|b| b.scan_collection(&collection))?;
            let doomed: Vec<BatchOp> = rows
                .into_iter()
                .filter(|(_, stored)| Self::is_expired(ttl, stored.written_at, now))
                .map(|(key, _)| BatchOp::Delete {
                    collection: collection.clone(),
                    key,
                })
                .collect();
            if doomed.is_empty() {
                continue;
            }
            removed += doomed.len() as u64;
            self.with_backend(|b| b.apply_batch(&doomed))?;
        }
        Ok(removed)
    }

    fn is_open(&self) -> bool {
        *self.is_open.read()
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
    }
}

fn open_backend(kind: BackendKind, path: &Path) -> StorageResult<Box<dyn KvBackend>> {
    Ok(match kind {
        BackendKind::Embedded => Box::new(RedbBackend::open(path)?),
        BackendKind::Relational => Box::new(SqliteBackend::open(path)?),
    })
}

fn database_path(root: &Path, kind: BackendKind) -> PathBuf {
    match kind {
        BackendKind::Embedded => root.join("peerbase.redb"),
        BackendKind::Relational => root.join("peerbase.db3"),
    }
}

/// Removes SQLite WAL sidecar files so a replaced database file is not
/// shadowed by stale journal state.
fn remove_sidecars(db_path: &Path) {
    for suffix in ["-wal", "-shm"] {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(suffix);
        let _ = fs::remove_file(PathBuf::from(name));
    }
}

fn validate_collection_name(name: &str) -> StorageResult<()> {
    if name.is_empty() {
        return Err(StorageError::invalid_name("collection name is empty"));
    }
    if name.contains(':') {
        return Err(StorageError::invalid_name(format!(
            "collection name may not contain ':': {name}"
        )));
    }
    Ok(())
}

fn validate_snapshot_name(name: &str) -> StorageResult<()> {
    if name.is_empty() {
        return Err(StorageError::invalid_name("snapshot name is empty"));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(StorageError::invalid_name(format!(
            "snapshot name may not contain path separators: {name}"
        )));
    }
    Ok(())
}

/// The Peerbase storage engine.
///
/// One engine instance owns one backing database (embedded B-tree or
/// relational, chosen at open time) plus everything layered on top:
/// collection metadata, TTL expiry, change notifications, transactions,
/// and snapshots. Collections and transactions borrow the engine and are
/// invalidated when it shuts down or restores a snapshot.
///
/// Cheap to clone; all clones share one engine.
///
/// # Opening an engine
///
/// ```rust,ignore
/// use peerbase_storage::{StorageEngine, StorageOptions};
///
/// let engine = StorageEngine::open_embedded("./data").await?;
/// let profiles = engine
///     .collection("profiles", StorageOptions::new().ttl_seconds(3600))
///     .await?;
///
/// profiles.put("u1", b"alice".to_vec()).await?;
/// assert_eq!(profiles.get("u1").await?, Some(b"alice".to_vec()));
///
/// engine.shutdown().await?;
/// ```
#[derive(Clone)]
pub struct StorageEngine {
    inner: Arc<EngineInner>,
}

impl StorageEngine {
    /// Opens an engine on the embedded B-tree backend.
    ///
    /// # Errors
    ///
    /// Initialization failures are fatal: the directory or database could
    /// not be created or opened.
    pub async fn open_embedded(root: impl Into<PathBuf>) -> StorageResult<Self> {
        Self::open_with(EngineConfig::new(root, BackendKind::Embedded)).await
    }

    /// Opens an engine on the lightweight relational backend.
    ///
    /// # Errors
    ///
    /// Initialization failures are fatal: the directory or database could
    /// not be created or opened.
    pub async fn open_relational(root: impl Into<PathBuf>) -> StorageResult<Self> {
        Self::open_with(EngineConfig::new(root, BackendKind::Relational)).await
    }

    /// Opens an engine with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Initialization failures are fatal: the directory or database could
    /// not be created or opened, or existing metadata is corrupt.
    pub async fn open_with(config: EngineConfig) -> StorageResult<Self> {
        fs::create_dir_all(&config.root)?;
        let backend = open_backend(config.backend, &database_path(&config.root, config.backend))?;

        let mut collections = HashMap::new();
        for meta in backend.load_collections()? {
            collections.insert(meta.name.clone(), meta);
        }

        let sweep_interval = config.sweep_interval;
        let inner = Arc::new(EngineInner {
            config,
            backend: RwLock::new(Some(backend)),
            collections: RwLock::new(collections),
            hub: NotificationHub::new(),
            is_open: RwLock::new(true),
            generation: AtomicU64::new(0),
            active_txns: Mutex::new(HashSet::new()),
            next_txn_id: AtomicU64::new(1),
            next_snapshot_seq: AtomicU64::new(1),
            snapshots: Mutex::new(HashMap::new()),
            sweeper: Mutex::new(None),
        });

        if !sweep_interval.is_zero() {
            let weak = Arc::downgrade(&inner);
            let handle = tokio::spawn(sweep_loop(weak, sweep_interval));
            *inner.sweeper.lock() = Some(handle);
        }

        debug!(
            backend = %inner.config.backend,
            root = %inner.config.root.display(),
            collections = inner.collections.read().len(),
            "storage engine open"
        );
        Ok(Self { inner })
    }

    /// Opens (creating if absent) a collection with the given options.
    ///
    /// Idempotent: re-opening an existing collection updates its options
    /// (TTL is evaluated with the options in effect at read time).
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid name, a closed engine, or a
    /// backend failure persisting the metadata row.
    pub async fn collection(
        &self,
        name: &str,
        options: StorageOptions,
    ) -> StorageResult<Collection> {
        self.inner.ensure_open()?;
        validate_collection_name(name)?;

        let mut collections = self.inner.collections.write();
        match collections.get_mut(name) {
            Some(meta) => {
                if meta.options != options {
                    meta.options = options;
                    let meta = meta.clone();
                    self.inner.with_backend(|b| b.save_collection(&meta))?;
                    debug!(collection = name, "collection options replaced");
                }
            }
            None => {
                let meta = CollectionMetadata {
                    name: name.to_string(),
                    options,
                    created_at: self.inner.now(),
                };
                self.inner.with_backend(|b| b.save_collection(&meta))?;
                collections.insert(name.to_string(), meta);
                debug!(collection = name, "collection created");
            }
        }
        drop(collections);

        Ok(Collection::new(
            Arc::clone(&self.inner),
            name.to_string(),
            self.inner.generation(),
        ))
    }

    /// Returns whether a collection exists (its metadata row is the
    /// source of truth).
    pub async fn has_collection(&self, name: &str) -> StorageResult<bool> {
        self.inner.ensure_open()?;
        Ok(self.inner.collection_exists(name))
    }

    /// Deletes a collection: closes it, then removes all entries and the
    /// metadata row atomically.
    ///
    /// Returns `false` when the collection does not exist or the backend
    /// failed (in which case nothing was committed).
    pub async fn delete_collection(&self, name: &str) -> StorageResult<bool> {
        self.inner.ensure_open()?;
        if !self.inner.collection_exists(name) {
            debug!(collection = name, "delete of unknown collection ignored");
            return Ok(false);
        }
        match self.inner.with_backend(|b| b.delete_collection(name)) {
            Ok(()) => {
                self.inner.collections.write().remove(name);
                debug!(collection = name, "collection deleted");
                Ok(true)
            }
            Err(e) => {
                error!(collection = name, error = %e, "collection delete failed");
                Ok(false)
            }
        }
    }

    /// Lists collection names, sorted (stable within a session).
    pub async fn list_collections(&self) -> StorageResult<Vec<String>> {
        self.inner.ensure_open()?;
        let mut names: Vec<String> = self.inner.collections.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Begins a transaction. The handle buffers operations until commit
    /// or rollback and is registered as active until then.
    pub async fn begin_transaction(&self) -> StorageResult<StorageTransaction> {
        self.inner.ensure_open()?;
        let id = self.inner.next_txn_id.fetch_add(1, Ordering::SeqCst);
        self.inner.active_txns.lock().insert(id);
        Ok(StorageTransaction::new(
            Arc::clone(&self.inner),
            id,
            self.inner.generation(),
        ))
    }

    /// Creates a named snapshot of the whole engine.
    ///
    /// Omitting the name generates `snapshot-<epochMillis>-<seq>`. The
    /// snapshot is a backend-consistent copy on disk, held in the
    /// engine's registry until consumed by [`restore_snapshot`]
    /// (single use) or released at shutdown.
    ///
    /// [`restore_snapshot`]: Self::restore_snapshot
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot snapshot (closed engine,
    /// invalid name, backend I/O failure).
    pub async fn create_snapshot(&self, name: Option<&str>) -> StorageResult<String> {
        self.inner.ensure_open()?;
        let id = match name {
            Some(name) => {
                validate_snapshot_name(name)?;
                name.to_string()
            }
            None => format!(
                "snapshot-{}-{}",
                self.inner.now(),
                self.inner.next_snapshot_seq.fetch_add(1, Ordering::SeqCst)
            ),
        };

        let dir = self.inner.config.root.join("snapshots");
        fs::create_dir_all(&dir)?;
        let path = dir.join(&id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        self.inner.with_backend(|b| {
            b.flush()?;
            b.snapshot_to(&path)
        })?;

        self.inner.snapshots.lock().insert(
            id.clone(),
            SnapshotHandle {
                path,
                created_at: self.inner.now(),
            },
        );
        debug!(snapshot = %id, "snapshot created");
        Ok(id)
    }

    /// Lists the ids of live (unconsumed) snapshots, newest first.
    pub async fn list_snapshots(&self) -> StorageResult<Vec<String>> {
        self.inner.ensure_open()?;
        let snapshots = self.inner.snapshots.lock();
        let mut ids: Vec<(&String, u64)> = snapshots
            .iter()
            .map(|(id, h)| (id, h.created_at))
            .collect();
        ids.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        Ok(ids.into_iter().map(|(id, _)| id.clone()).collect())
    }

    /// Restores the engine from a snapshot, consuming it.
    ///
    /// The whole engine is reinitialized from the snapshot file: every
    /// open collection handle and transaction is invalidated. Returns
    /// `Ok(false)` on an I/O failure replacing the database, in which
    /// case the engine stays on its pre-restore state and the snapshot
    /// remains live.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::SnapshotNotFound`] for an id that is not
    /// live in this engine, or an error if the restored database cannot
    /// be reopened.
    pub async fn restore_snapshot(&self, id: &str) -> StorageResult<bool> {
        self.inner.ensure_open()?;
        let handle = self
            .inner
            .snapshots
            .lock()
            .remove(id)
            .ok_or_else(|| StorageError::snapshot_not_found(id))?;

        let kind = self.inner.config.backend;
        let db_path = database_path(&self.inner.config.root, kind);

        let mut guard = self.inner.backend.write();
        // Close the live backend before replacing its file.
        drop(guard.take());
        remove_sidecars(&db_path);

        if let Err(e) = fs::copy(&handle.path, &db_path) {
            error!(snapshot = id, error = %e, "snapshot restore failed, reopening previous state");
            match open_backend(kind, &db_path) {
                Ok(backend) => *guard = Some(backend),
                Err(reopen) => {
                    error!(error = %reopen, "could not reopen database after failed restore");
                }
            }
            // The snapshot was not consumed.
            self.inner.snapshots.lock().insert(id.to_string(), handle);
            return Ok(false);
        }

        let backend = open_backend(kind, &db_path)?;
        let mut collections = HashMap::new();
        for meta in backend.load_collections()? {
            collections.insert(meta.name.clone(), meta);
        }
        *guard = Some(backend);
        drop(guard);

        *self.inner.collections.write() = collections;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.active_txns.lock().clear();
        debug!(snapshot = id, "engine restored from snapshot");
        Ok(true)
    }

    /// Computes aggregate statistics by full scan.
    ///
    /// O(total entries); callers needing hot-path numbers should cache.
    pub async fn stats(&self) -> StorageResult<StorageStats> {
        self.inner.ensure_open()?;
        let now = self.inner.now();
        let metas: Vec<CollectionMetadata> =
            self.inner.collections.read().values().cloned().collect();

        let mut live_entries = 0u64;
        let mut expired_entries = 0u64;
        let mut total_value_bytes = 0u64;
        for meta in &metas {
            let ttl = meta.options.ttl_seconds.map(|s| u64::from(s) * 1000);
            let rows = self
                .inner
                .with_backend(|b| b.scan_collection(&meta.name))?;
            for (_, stored) in rows {
                if EngineInner::is_expired(ttl, stored.written_at, now) {
                    expired_entries += 1;
                } else {
                    live_entries += 1;
                    total_value_bytes += stored.value.len() as u64;
                }
            }
        }

        Ok(StorageStats {
            backend: self.inner.config.backend,
            collections: metas.len(),
            live_entries,
            expired_entries,
            total_value_bytes,
            active_transactions: self.inner.active_txns.lock().len(),
            snapshots: self.inner.snapshots.lock().len(),
        })
    }

    /// Runs one sweep pass immediately, returning the number of expired
    /// entries physically deleted.
    pub async fn sweep_now(&self) -> StorageResult<u64> {
        self.inner.ensure_open()?;
        self.inner.sweep_expired()
    }

    /// Returns the backend this engine runs on.
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.inner.config.backend
    }

    /// Returns whether the engine is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// Shuts the engine down.
    ///
    /// Cancels the sweeper, rolls back active transactions, releases all
    /// snapshot handles (their files are removed), and closes the
    /// backend. Idempotent.
    pub async fn shutdown(&self) -> StorageResult<()> {
        {
            let mut open = self.inner.is_open.write();
            if !*open {
                return Ok(());
            }
            *open = false;
        }

        if let Some(sweeper) = self.inner.sweeper.lock().take() {
            sweeper.abort();
        }
        self.inner.active_txns.lock().clear();
        for (_, handle) in self.inner.snapshots.lock().drain() {
            let _ = fs::remove_file(&handle.path);
        }
        if let Some(backend) = self.inner.backend.write().take() {
            if let Err(e) = backend.flush() {
                warn!(error = %e, "flush on shutdown failed");
            }
        }
        debug!("storage engine closed");
        Ok(())
    }
}

impl fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageEngine")
            .field("backend", &self.inner.config.backend)
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

async fn sweep_loop(inner: Weak<EngineInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so a fresh engine does
    // not scan an empty database.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else { break };
        if !inner.is_open() {
            break;
        }
        match inner.sweep_expired() {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "ttl sweep removed expired entries"),
            Err(e) => warn!(error = %e, "ttl sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_are_validated() {
        assert!(validate_collection_name("profiles").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("a:b").is_err());
    }

    #[test]
    fn snapshot_names_are_validated() {
        assert!(validate_snapshot_name("nightly").is_ok());
        assert!(validate_snapshot_name("").is_err());
        assert!(validate_snapshot_name("../escape").is_err());
        assert!(validate_snapshot_name("a/b").is_err());
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        // now - written_at >= ttl means expired.
        assert!(!EngineInner::is_expired(Some(1000), 0, 999));
        assert!(EngineInner::is_expired(Some(1000), 0, 1000));
        assert!(EngineInner::is_expired(Some(1000), 0, 1001));
        assert!(!EngineInner::is_expired(None, 0, u64::MAX));
    }

    #[test]
    fn database_paths_differ_per_backend() {
        let root = Path::new("/tmp/x");
        assert_ne!(
            database_path(root, BackendKind::Embedded),
            database_path(root, BackendKind::Relational)
        );
    }
}

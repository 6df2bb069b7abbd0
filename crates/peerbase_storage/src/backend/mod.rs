//! Storage backend trait and implementations.

mod redb_backend;
mod sqlite_backend;

pub use redb_backend::RedbBackend;
pub use sqlite_backend::SqliteBackend;

use crate::error::StorageResult;
use crate::options::CollectionMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Which backing engine a storage instance runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// Embedded B-tree store (redb), single flat keyspace with composite
    /// `collection:key` entry keys.
    Embedded,
    /// Lightweight relational store (SQLite), entries indexed on
    /// `(collection, key)`.
    Relational,
}

impl BackendKind {
    /// All supported backends, for tests that must pass on each.
    pub const ALL: [BackendKind; 2] = [BackendKind::Embedded, BackendKind::Relational];
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embedded => f.write_str("embedded"),
            Self::Relational => f.write_str("relational"),
        }
    }
}

/// A stored value together with its write timestamp.
///
/// The timestamp is what TTL expiry is evaluated against; the value bytes
/// are returned to callers untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredValue {
    /// The value bytes as written.
    pub value: Vec<u8>,
    /// Write time, epoch millis.
    pub written_at: u64,
}

/// One operation of an atomic batch write.
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Insert or replace an entry.
    Put {
        /// Target collection.
        collection: String,
        /// Entry key.
        key: String,
        /// Value bytes.
        value: Vec<u8>,
        /// Write timestamp, epoch millis.
        written_at: u64,
    },
    /// Remove an entry (absent entries are ignored).
    Delete {
        /// Target collection.
        collection: String,
        /// Entry key.
        key: String,
    },
}

/// A low-level key-value backend for the storage engine.
///
/// Backends are addressed in `(collection, key)` terms and choose their
/// own physical layout; the engine layers TTL filtering, notifications,
/// and transactions on top, so the two implementations stay behaviorally
/// identical through the public contract.
///
/// # Invariants
///
/// - `get` returns exactly the bytes and timestamp of the latest `put`
/// - `apply_batch` is all-or-nothing: on error, no operation is visible
/// - `delete_collection` removes the metadata row and every entry row in
///   one atomic step
/// - `snapshot_to` produces a self-contained database file that a fresh
///   backend of the same kind can open
/// - Implementations must be `Send + Sync`
///
/// # Implementors
///
/// - [`RedbBackend`] - embedded B-tree store
/// - [`SqliteBackend`] - lightweight relational store
pub trait KvBackend: Send + Sync {
    /// Returns which engine this backend runs on.
    fn kind(&self) -> BackendKind;

    /// Returns the path of the backing database file.
    fn path(&self) -> &Path;

    /// Reads an entry.
    ///
    /// # Errors
    ///
    /// Returns an error on backend I/O failure or a corrupt row.
    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<StoredValue>>;

    /// Inserts or replaces an entry.
    ///
    /// # Errors
    ///
    /// Returns an error on backend I/O failure.
    fn put(&self, collection: &str, key: &str, value: &[u8], written_at: u64)
        -> StorageResult<()>;

    /// Removes an entry. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error on backend I/O failure.
    fn delete(&self, collection: &str, key: &str) -> StorageResult<bool>;

    /// Returns all entries of a collection, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error on backend I/O failure or a corrupt row.
    fn scan_collection(&self, collection: &str) -> StorageResult<Vec<(String, StoredValue)>>;

    /// Returns the entries of a collection whose keys start with `prefix`,
    /// ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error on backend I/O failure or a corrupt row.
    fn scan_prefix(
        &self,
        collection: &str,
        prefix: &str,
    ) -> StorageResult<Vec<(String, StoredValue)>>;

    /// Applies a batch of operations atomically.
    ///
    /// # Errors
    ///
    /// Returns an error on backend I/O failure; in that case none of the
    /// operations are applied.
    fn apply_batch(&self, ops: &[BatchOp]) -> StorageResult<()>;

    /// Loads all collection metadata rows.
    ///
    /// # Errors
    ///
    /// Returns an error on backend I/O failure or a corrupt row.
    fn load_collections(&self) -> StorageResult<Vec<CollectionMetadata>>;

    /// Inserts or replaces a collection metadata row.
    ///
    /// # Errors
    ///
    /// Returns an error on backend I/O failure.
    fn save_collection(&self, meta: &CollectionMetadata) -> StorageResult<()>;

    /// Removes a collection's metadata row and all of its entries
    /// atomically.
    ///
    /// # Errors
    ///
    /// Returns an error on backend I/O failure; in that case nothing is
    /// removed.
    fn delete_collection(&self, name: &str) -> StorageResult<()>;

    /// Writes a consistent point-in-time copy of the database to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error on backend I/O failure.
    fn snapshot_to(&self, path: &Path) -> StorageResult<()>;

    /// Flushes pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error on backend I/O failure.
    fn flush(&self) -> StorageResult<()>;
}

#[cfg(test)]
mod conformance {
    //! Behavioral conformance tests run against both backends.

    use super::*;
    use crate::options::StorageOptions;
    use tempfile::TempDir;

    fn open(kind: BackendKind, dir: &TempDir) -> Box<dyn KvBackend> {
        let path = dir.path().join(format!("db-{kind}"));
        match kind {
            BackendKind::Embedded => Box::new(RedbBackend::open(&path).unwrap()),
            BackendKind::Relational => Box::new(SqliteBackend::open(&path).unwrap()),
        }
    }

    fn meta(name: &str) -> CollectionMetadata {
        CollectionMetadata {
            name: name.to_string(),
            options: StorageOptions::default(),
            created_at: 42,
        }
    }

    #[test]
    fn put_get_delete_roundtrip() {
        for kind in BackendKind::ALL {
            let dir = TempDir::new().unwrap();
            let backend = open(kind, &dir);

            assert!(backend.get("c", "k").unwrap().is_none());
            backend.put("c", "k", b"value", 7).unwrap();

            let stored = backend.get("c", "k").unwrap().unwrap();
            assert_eq!(stored.value, b"value");
            assert_eq!(stored.written_at, 7);

            assert!(backend.delete("c", "k").unwrap());
            assert!(!backend.delete("c", "k").unwrap());
            assert!(backend.get("c", "k").unwrap().is_none());
        }
    }

    #[test]
    fn put_replaces_existing() {
        for kind in BackendKind::ALL {
            let dir = TempDir::new().unwrap();
            let backend = open(kind, &dir);

            backend.put("c", "k", b"v1", 1).unwrap();
            backend.put("c", "k", b"v2", 2).unwrap();

            let stored = backend.get("c", "k").unwrap().unwrap();
            assert_eq!(stored.value, b"v2");
            assert_eq!(stored.written_at, 2);
        }
    }

    #[test]
    fn collections_are_isolated() {
        for kind in BackendKind::ALL {
            let dir = TempDir::new().unwrap();
            let backend = open(kind, &dir);

            backend.put("a", "k", b"in-a", 1).unwrap();
            backend.put("b", "k", b"in-b", 1).unwrap();

            assert_eq!(backend.get("a", "k").unwrap().unwrap().value, b"in-a");
            assert_eq!(backend.get("b", "k").unwrap().unwrap().value, b"in-b");
            assert_eq!(backend.scan_collection("a").unwrap().len(), 1);
        }
    }

    #[test]
    fn scans_are_key_ordered_and_prefix_filtered() {
        for kind in BackendKind::ALL {
            let dir = TempDir::new().unwrap();
            let backend = open(kind, &dir);

            for key in ["user:2", "user:1", "post:9", "user:10"] {
                backend.put("c", key, key.as_bytes(), 1).unwrap();
            }

            let all: Vec<String> = backend
                .scan_collection("c")
                .unwrap()
                .into_iter()
                .map(|(k, _)| k)
                .collect();
            assert_eq!(all, vec!["post:9", "user:1", "user:10", "user:2"]);

            let users: Vec<String> = backend
                .scan_prefix("c", "user:")
                .unwrap()
                .into_iter()
                .map(|(k, _)| k)
                .collect();
            assert_eq!(users, vec!["user:1", "user:10", "user:2"]);

            assert!(backend.scan_prefix("c", "zzz").unwrap().is_empty());
        }
    }

    #[test]
    fn keys_may_contain_separator_characters() {
        for kind in BackendKind::ALL {
            let dir = TempDir::new().unwrap();
            let backend = open(kind, &dir);

            backend.put("c", "a:b:c", b"colons", 1).unwrap();
            assert_eq!(backend.get("c", "a:b:c").unwrap().unwrap().value, b"colons");

            // A key equal to another collection's composite must not leak.
            backend.put("c", "k", b"real", 1).unwrap();
            assert!(backend.get("c:k", "").unwrap().is_none());
        }
    }

    #[test]
    fn batch_applies_in_order() {
        for kind in BackendKind::ALL {
            let dir = TempDir::new().unwrap();
            let backend = open(kind, &dir);

            backend.put("c", "gone", b"old", 1).unwrap();
            backend
                .apply_batch(&[
                    BatchOp::Put {
                        collection: "c".into(),
                        key: "k".into(),
                        value: b"first".to_vec(),
                        written_at: 2,
                    },
                    BatchOp::Delete {
                        collection: "c".into(),
                        key: "gone".into(),
                    },
                    BatchOp::Put {
                        collection: "c".into(),
                        key: "k".into(),
                        value: b"second".to_vec(),
                        written_at: 3,
                    },
                ])
                .unwrap();

            assert_eq!(backend.get("c", "k").unwrap().unwrap().value, b"second");
            assert!(backend.get("c", "gone").unwrap().is_none());
        }
    }

    #[test]
    fn collection_metadata_rows() {
        for kind in BackendKind::ALL {
            let dir = TempDir::new().unwrap();
            let backend = open(kind, &dir);

            assert!(backend.load_collections().unwrap().is_empty());
            backend.save_collection(&meta("users")).unwrap();
            backend.save_collection(&meta("posts")).unwrap();

            let mut names: Vec<String> = backend
                .load_collections()
                .unwrap()
                .into_iter()
                .map(|m| m.name)
                .collect();
            names.sort();
            assert_eq!(names, vec!["posts", "users"]);
        }
    }

    #[test]
    fn delete_collection_removes_rows_and_metadata() {
        for kind in BackendKind::ALL {
            let dir = TempDir::new().unwrap();
            let backend = open(kind, &dir);

            backend.save_collection(&meta("users")).unwrap();
            backend.put("users", "u1", b"alice", 1).unwrap();
            backend.put("users", "u2", b"bob", 1).unwrap();
            backend.put("posts", "p1", b"hello", 1).unwrap();

            backend.delete_collection("users").unwrap();

            assert!(backend.scan_collection("users").unwrap().is_empty());
            assert!(backend.load_collections().unwrap().is_empty());
            // Other collections untouched.
            assert_eq!(backend.scan_collection("posts").unwrap().len(), 1);
        }
    }

    #[test]
    fn snapshot_is_a_complete_copy() {
        for kind in BackendKind::ALL {
            let dir = TempDir::new().unwrap();
            let backend = open(kind, &dir);

            backend.save_collection(&meta("c")).unwrap();
            backend.put("c", "k", b"snapshot me", 5).unwrap();

            let snap_path = dir.path().join(format!("snap-{kind}"));
            backend.snapshot_to(&snap_path).unwrap();

            // Mutate the live database after the snapshot.
            backend.put("c", "k", b"changed", 6).unwrap();

            let restored: Box<dyn KvBackend> = match kind {
                BackendKind::Embedded => Box::new(RedbBackend::open(&snap_path).unwrap()),
                BackendKind::Relational => Box::new(SqliteBackend::open(&snap_path).unwrap()),
            };
            let stored = restored.get("c", "k").unwrap().unwrap();
            assert_eq!(stored.value, b"snapshot me");
            assert_eq!(stored.written_at, 5);
            assert_eq!(restored.load_collections().unwrap().len(), 1);
        }
    }

    #[test]
    fn reopen_preserves_data() {
        for kind in BackendKind::ALL {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join(format!("reopen-{kind}"));
            {
                let backend: Box<dyn KvBackend> = match kind {
                    BackendKind::Embedded => Box::new(RedbBackend::open(&path).unwrap()),
                    BackendKind::Relational => Box::new(SqliteBackend::open(&path).unwrap()),
                };
                backend.put("c", "k", b"persisted", 9).unwrap();
                backend.flush().unwrap();
            }
            let backend: Box<dyn KvBackend> = match kind {
                BackendKind::Embedded => Box::new(RedbBackend::open(&path).unwrap()),
                BackendKind::Relational => Box::new(SqliteBackend::open(&path).unwrap()),
            };
            assert_eq!(backend.get("c", "k").unwrap().unwrap().value, b"persisted");
        }
    }
}

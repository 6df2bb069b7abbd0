//! # Peerbase Storage
//!
//! Transactional key-value storage engine for the Peerbase substrate.
//!
//! The engine layers collections, per-entry TTL, change notification
//! streams, snapshots, and buffered transactions over a pluggable
//! [`KvBackend`]. Two backends ship with the crate and are behaviorally
//! identical through the public contract:
//!
//! - [`RedbBackend`] - embedded B-tree store (redb), composite
//!   `collection:key` keys in one flat keyspace
//! - [`SqliteBackend`] - lightweight relational store (SQLite), entries
//!   indexed on `(collection, key)`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use peerbase_storage::{StorageEngine, StorageOptions};
//!
//! let engine = StorageEngine::open_embedded("./data").await?;
//! let profiles = engine
//!     .collection("profiles", StorageOptions::new().ttl_seconds(3600))
//!     .await?;
//!
//! profiles.put("u1", b"alice".to_vec()).await?;
//!
//! // Observers get the current value first, then live updates.
//! let mut changes = profiles.observe("u1")?;
//!
//! // Transactions buffer operations and apply them atomically.
//! let mut txn = engine.begin_transaction().await?;
//! txn.put("profiles", "u2", b"bob".to_vec())?;
//! txn.delete("profiles", "u1")?;
//! txn.commit().await?;
//!
//! engine.shutdown().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod collection;
mod engine;
mod error;
mod observe;
mod options;
mod stats;
mod time;
mod transaction;

pub use backend::{BackendKind, BatchOp, KvBackend, RedbBackend, SqliteBackend, StoredValue};
pub use collection::Collection;
pub use engine::{EngineConfig, StorageEngine};
pub use error::{StorageError, StorageResult};
pub use observe::{ChangeKind, ChangeNotification, ObserveStream};
pub use options::{CollectionMetadata, StorageOptions};
pub use stats::StorageStats;
pub use time::{ManualTimeSource, SystemTimeSource, TimeSource};
pub use transaction::{StorageTransaction, TransactionState};

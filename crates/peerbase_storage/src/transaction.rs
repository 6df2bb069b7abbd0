//! Buffered multi-key, multi-collection transactions.

use crate::engine::EngineInner;
use crate::error::{StorageError, StorageResult};
use std::sync::Arc;
use tracing::debug;

/// State of a transaction. Terminal states reject every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Operations may be buffered.
    Active,
    /// Commit succeeded. Terminal.
    Committed,
    /// Rolled back (explicitly or after a failed commit). Terminal.
    RolledBack,
}

/// One buffered mutation.
#[derive(Debug, Clone)]
struct BufferedOp {
    collection: String,
    key: String,
    /// `Some` for a put, `None` for a delete.
    value: Option<Vec<u8>>,
}

/// A single-use buffered transaction.
///
/// Operations are buffered in order. A `get` consults the buffer in
/// reverse insertion order first - a later put or delete shadows both
/// earlier buffered operations and the committed store - before falling
/// through to the committed store (TTL-filtered).
///
/// `commit` applies the buffer as one atomic batch and fires exactly one
/// change notification per distinct (collection, key), last writer wins.
/// `rollback` discards the buffer with no side effects. After either, the
/// transaction is terminal and every operation fails with
/// [`StorageError::TransactionNotActive`].
pub struct StorageTransaction {
    inner: Arc<EngineInner>,
    id: u64,
    generation: u64,
    state: TransactionState,
    ops: Vec<BufferedOp>,
}

impl StorageTransaction {
    pub(crate) fn new(inner: Arc<EngineInner>, id: u64, generation: u64) -> Self {
        Self {
            inner,
            id,
            generation,
            state: TransactionState::Active,
            ops: Vec::new(),
        }
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns the number of buffered operations.
    #[must_use]
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    /// Buffers a put.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is no longer active.
    pub fn put(&mut self, collection: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.ensure_active()?;
        self.ops.push(BufferedOp {
            collection: collection.to_string(),
            key: key.to_string(),
            value: Some(value),
        });
        Ok(())
    }

    /// Buffers a delete.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is no longer active.
    pub fn delete(&mut self, collection: &str, key: &str) -> StorageResult<()> {
        self.ensure_active()?;
        self.ops.push(BufferedOp {
            collection: collection.to_string(),
            key: key.to_string(),
            value: None,
        });
        Ok(())
    }

    /// Reads a key with read-your-own-writes visibility.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is no longer active, the engine closed,
    /// or the handle was invalidated by a snapshot restore.
    pub async fn get(&mut self, collection: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_active()?;
        self.check_engine()?;
        for op in self.ops.iter().rev() {
            if op.collection == collection && op.key == key {
                return Ok(op.value.clone());
            }
        }
        self.inner.read_entry(collection, key)
    }

    /// Commits the buffered operations as one atomic batch.
    ///
    /// On backend failure nothing is applied, the buffer is discarded,
    /// and the transaction ends rolled back.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is no longer active, a touched collection
    /// does not exist, or the backend rejects the batch.
    pub async fn commit(&mut self) -> StorageResult<()> {
        self.ensure_active()?;
        if let Err(e) = self.check_engine() {
            self.finish(TransactionState::RolledBack);
            return Err(e);
        }

        let writes: Vec<(String, String, Option<Vec<u8>>)> = self
            .ops
            .drain(..)
            .map(|op| (op.collection, op.key, op.value))
            .collect();
        match self.inner.commit_batch(writes) {
            Ok(()) => {
                self.finish(TransactionState::Committed);
                debug!(txn = self.id, "transaction committed");
                Ok(())
            }
            Err(e) => {
                self.finish(TransactionState::RolledBack);
                debug!(txn = self.id, error = %e, "transaction commit failed, discarded");
                Err(e)
            }
        }
    }

    /// Discards the buffered operations with no side effects.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is no longer active.
    pub async fn rollback(&mut self) -> StorageResult<()> {
        self.ensure_active()?;
        self.ops.clear();
        self.finish(TransactionState::RolledBack);
        debug!(txn = self.id, "transaction rolled back");
        Ok(())
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.inner.unregister_txn(self.id);
    }

    fn ensure_active(&self) -> StorageResult<()> {
        if self.state == TransactionState::Active {
            Ok(())
        } else {
            Err(StorageError::TransactionNotActive)
        }
    }

    fn check_engine(&self) -> StorageResult<()> {
        self.inner.check_generation(self.generation)?;
        if self.inner.txn_is_active(self.id) {
            Ok(())
        } else {
            // The engine dropped this transaction (snapshot restore or
            // shutdown race).
            Err(StorageError::StaleHandle)
        }
    }
}

impl Drop for StorageTransaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            self.inner.unregister_txn(self.id);
        }
    }
}

impl std::fmt::Debug for StorageTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageTransaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("ops", &self.ops.len())
            .finish_non_exhaustive()
    }
}

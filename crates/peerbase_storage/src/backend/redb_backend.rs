//! Embedded B-tree backend (redb).
//!
//! Entries live in a single flat keyspace under composite
//! `"<collection>:<key>"` keys; collection names may not contain `:` (the
//! engine enforces this), so the composite parses unambiguously. Values
//! and metadata rows are bincode-framed.

use crate::backend::{BackendKind, BatchOp, KvBackend, StoredValue};
use crate::error::{StorageError, StorageResult};
use crate::options::CollectionMetadata;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};

const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");
const COLLECTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("collections");

/// Storage backend over an embedded redb B-tree database.
pub struct RedbBackend {
    db: Database,
    path: PathBuf,
}

impl RedbBackend {
    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or is not a valid
    /// database.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let db = Database::create(path)?;
        // Make sure both tables exist so read transactions never race
        // their creation.
        let txn = db.begin_write()?;
        {
            txn.open_table(ENTRIES)?;
            txn.open_table(COLLECTIONS)?;
        }
        txn.commit()?;
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    fn composite(collection: &str, key: &str) -> String {
        format!("{collection}:{key}")
    }

    fn scan_composite_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, StoredValue)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let mut out = Vec::new();
        for item in table.range(prefix..)? {
            let (key_guard, value_guard) = item?;
            let composite = key_guard.value();
            if !composite.starts_with(prefix) {
                break;
            }
            let stored: StoredValue = bincode::deserialize(value_guard.value())?;
            out.push((composite[prefix.len()..].to_string(), stored));
        }
        Ok(out)
    }
}

impl KvBackend for RedbBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Embedded
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<StoredValue>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        match table.get(Self::composite(collection, key).as_str())? {
            Some(guard) => Ok(Some(bincode::deserialize(guard.value())?)),
            None => Ok(None),
        }
    }

    fn put(
        &self,
        collection: &str,
        key: &str,
        value: &[u8],
        written_at: u64,
    ) -> StorageResult<()> {
        let framed = bincode::serialize(&StoredValue {
            value: value.to_vec(),
            written_at,
        })?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ENTRIES)?;
            table.insert(Self::composite(collection, key).as_str(), framed.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn delete(&self, collection: &str, key: &str) -> StorageResult<bool> {
        let txn = self.db.begin_write()?;
        let existed = {
            let mut table = txn.open_table(ENTRIES)?;
            let removed = table
                .remove(Self::composite(collection, key).as_str())?
                .is_some();
            removed
        };
        txn.commit()?;
        Ok(existed)
    }

    fn scan_collection(&self, collection: &str) -> StorageResult<Vec<(String, StoredValue)>> {
        self.scan_composite_prefix(&format!("{collection}:"))
    }

    fn scan_prefix(
        &self,
        collection: &str,
        prefix: &str,
    ) -> StorageResult<Vec<(String, StoredValue)>> {
        self.scan_composite_prefix(&format!("{collection}:{prefix}"))
    }

    fn apply_batch(&self, ops: &[BatchOp]) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ENTRIES)?;
            for op in ops {
                match op {
                    BatchOp::Put {
                        collection,
                        key,
                        value,
                        written_at,
                    } => {
                        let framed = bincode::serialize(&StoredValue {
                            value: value.clone(),
                            written_at: *written_at,
                        })?;
                        table.insert(Self::composite(collection, key).as_str(), framed.as_slice())?;
                    }
                    BatchOp::Delete { collection, key } => {
                        table.remove(Self::composite(collection, key).as_str())?;
                    }
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn load_collections(&self) -> StorageResult<Vec<CollectionMetadata>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(COLLECTIONS)?;
        let mut out = Vec::new();
        for item in table.iter()? {
            let (_, value_guard) = item?;
            out.push(bincode::deserialize(value_guard.value())?);
        }
        Ok(out)
    }

    fn save_collection(&self, meta: &CollectionMetadata) -> StorageResult<()> {
        let framed = bincode::serialize(meta)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(COLLECTIONS)?;
            table.insert(meta.name.as_str(), framed.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn delete_collection(&self, name: &str) -> StorageResult<()> {
        let prefix = format!("{name}:");
        let txn = self.db.begin_write()?;
        {
            let mut collections = txn.open_table(COLLECTIONS)?;
            collections.remove(name)?;

            let mut entries = txn.open_table(ENTRIES)?;
            let mut doomed = Vec::new();
            for item in entries.range(prefix.as_str()..)? {
                let (key_guard, _) = item?;
                let composite = key_guard.value();
                if !composite.starts_with(&prefix) {
                    break;
                }
                doomed.push(composite.to_string());
            }
            for key in doomed {
                entries.remove(key.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn snapshot_to(&self, path: &Path) -> StorageResult<()> {
        // Copy row-by-row inside one read transaction: a consistent view
        // regardless of concurrent writers.
        let snapshot = Database::create(path)?;
        let read_txn = self.db.begin_read()?;
        let write_txn = snapshot.begin_write()?;
        {
            let src = read_txn.open_table(ENTRIES)?;
            let mut dst = write_txn.open_table(ENTRIES)?;
            for item in src.iter()? {
                let (k, v) = item?;
                dst.insert(k.value(), v.value())?;
            }

            let src = read_txn.open_table(COLLECTIONS)?;
            let mut dst = write_txn.open_table(COLLECTIONS)?;
            for item in src.iter()? {
                let (k, v) = item?;
                dst.insert(k.value(), v.value())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn flush(&self) -> StorageResult<()> {
        // Every write transaction commits durably; nothing is buffered.
        Ok(())
    }
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn corrupt_value_surfaces_as_corruption() {
        let dir = TempDir::new().unwrap();
        let backend = RedbBackend::open(&dir.path().join("db")).unwrap();

        // Write raw garbage bytes directly, bypassing the framing.
        let txn = backend.db.begin_write().unwrap();
        {
            let mut table = txn.open_table(ENTRIES).unwrap();
            table.insert("c:bad", b"\xff\xff".as_slice()).unwrap();
        }
        txn.commit().unwrap();

        let result = backend.get("c", "bad");
        assert!(matches!(result, Err(StorageError::Corrupted { .. })));
    }

    #[test]
    fn composite_prefix_does_not_cross_collections() {
        let dir = TempDir::new().unwrap();
        let backend = RedbBackend::open(&dir.path().join("db")).unwrap();

        backend.put("user", "1", b"a", 1).unwrap();
        backend.put("users", "1", b"b", 1).unwrap();

        let scanned = backend.scan_collection("user").unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].1.value, b"a");
    }
}

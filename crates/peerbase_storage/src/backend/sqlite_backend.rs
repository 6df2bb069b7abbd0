//! Lightweight relational backend (SQLite via rusqlite).
//!
//! The relational layout indexes entries on `(collection, key)` instead of
//! a composite flat key; collection options are stored as a JSON column.
//! The connection runs in WAL mode behind a mutex.

use crate::backend::{BackendKind, BatchOp, KvBackend, StoredValue};
use crate::error::{StorageError, StorageResult};
use crate::options::CollectionMetadata;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entries (
    collection TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      BLOB NOT NULL,
    written_at INTEGER NOT NULL,
    PRIMARY KEY (collection, key)
);
CREATE TABLE IF NOT EXISTS collections (
    name       TEXT PRIMARY KEY,
    options    TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
";

/// Storage backend over an embedded SQLite database.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteBackend {
    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot
    /// be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        // journal_mode reports the resulting mode as a row
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    fn row_to_stored(value: Vec<u8>, written_at: i64) -> StoredValue {
        StoredValue {
            value,
            written_at: written_at as u64,
        }
    }
}

impl KvBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<StoredValue>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT value, written_at FROM entries WHERE collection = ?1 AND key = ?2",
                params![collection, key],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(value, written_at)| Self::row_to_stored(value, written_at)))
    }

    fn put(
        &self,
        collection: &str,
        key: &str,
        value: &[u8],
        written_at: u64,
    ) -> StorageResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO entries (collection, key, value, written_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![collection, key, value, written_at as i64],
        )?;
        Ok(())
    }

    fn delete(&self, collection: &str, key: &str) -> StorageResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "DELETE FROM entries WHERE collection = ?1 AND key = ?2",
            params![collection, key],
        )?;
        Ok(changed > 0)
    }

    fn scan_collection(&self, collection: &str) -> StorageResult<Vec<(String, StoredValue)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT key, value, written_at FROM entries WHERE collection = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![collection], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (key, value, written_at) = row?;
            out.push((key, Self::row_to_stored(value, written_at)));
        }
        Ok(out)
    }

    fn scan_prefix(
        &self,
        collection: &str,
        prefix: &str,
    ) -> StorageResult<Vec<(String, StoredValue)>> {
        let conn = self.conn.lock();
        // substr comparison instead of LIKE: prefix characters must never
        // act as wildcards.
        let mut stmt = conn.prepare(
            "SELECT key, value, written_at FROM entries
             WHERE collection = ?1 AND substr(key, 1, length(?2)) = ?2
             ORDER BY key",
        )?;
        let rows = stmt.query_map(params![collection, prefix], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (key, value, written_at) = row?;
            out.push((key, Self::row_to_stored(value, written_at)));
        }
        Ok(out)
    }

    fn apply_batch(&self, ops: &[BatchOp]) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for op in ops {
            match op {
                BatchOp::Put {
                    collection,
                    key,
                    value,
                    written_at,
                } => {
                    tx.execute(
                        "INSERT OR REPLACE INTO entries (collection, key, value, written_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![collection, key, value, *written_at as i64],
                    )?;
                }
                BatchOp::Delete { collection, key } => {
                    tx.execute(
                        "DELETE FROM entries WHERE collection = ?1 AND key = ?2",
                        params![collection, key],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_collections(&self) -> StorageResult<Vec<CollectionMetadata>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name, options, created_at FROM collections")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (name, options_json, created_at) = row?;
            let options = serde_json::from_str(&options_json)
                .map_err(|e| StorageError::corrupted(format!("options for {name}: {e}")))?;
            out.push(CollectionMetadata {
                name,
                options,
                created_at: created_at as u64,
            });
        }
        Ok(out)
    }

    fn save_collection(&self, meta: &CollectionMetadata) -> StorageResult<()> {
        let options_json = serde_json::to_string(&meta.options)
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO collections (name, options, created_at)
             VALUES (?1, ?2, ?3)",
            params![meta.name, options_json, meta.created_at as i64],
        )?;
        Ok(())
    }

    fn delete_collection(&self, name: &str) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE collection = ?1", params![name])?;
        tx.execute("DELETE FROM collections WHERE name = ?1", params![name])?;
        tx.commit()?;
        Ok(())
    }

    fn snapshot_to(&self, path: &Path) -> StorageResult<()> {
        let conn = self.conn.lock();
        let mut dst = Connection::open(path)?;
        let backup = rusqlite::backup::Backup::new(&conn, &mut dst)?;
        backup.run_to_completion(64, Duration::from_millis(5), None)?;
        Ok(())
    }

    fn flush(&self) -> StorageResult<()> {
        let conn = self.conn.lock();
        // wal_checkpoint reports (busy, log, checkpointed) as a row
        conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))
            .optional()?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

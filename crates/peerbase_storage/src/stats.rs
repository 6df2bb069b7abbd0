//! Aggregate engine statistics.

use crate::backend::BackendKind;

/// Aggregate counts for a storage engine, computed by full scan.
///
/// Producing this is O(total entries); callers needing hot-path numbers
/// should cache the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Which backend the engine runs on.
    pub backend: BackendKind,
    /// Number of collections (metadata rows).
    pub collections: usize,
    /// Entries visible to reads.
    pub live_entries: u64,
    /// Entries past their TTL but not yet physically deleted.
    pub expired_entries: u64,
    /// Total bytes of live values.
    pub total_value_bytes: u64,
    /// Transactions currently registered as active.
    pub active_transactions: usize,
    /// Live (unconsumed) snapshots.
    pub snapshots: usize,
}

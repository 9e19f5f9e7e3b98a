//! # billguard-store
//!
//! Benchmark history: an append-only transaction log plus versioned
//! snapshots per (model, dataset, prompt, environment) key.
//!
//! ## Invariants
//!
//! 1. **Append-only log**: transactions are never updated or deleted
//! 2. **Monotonic versions**: each key's versions run 1, 2, 3, ... with no
//!    gaps or reuse
//! 3. **One current snapshot**: after every upsert or checkout exactly one
//!    snapshot per key has `is_current = true`
//!
//! Upserts for the same key serialize; upserts for different keys do not
//! wait on each other in [`MemoryStore`]. [`SqliteStore`] runs each upsert
//! in one immediate database transaction.

mod error;
mod memory;
mod sqlite;
mod types;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{
    BenchmarkSnapshot, BenchmarkTransaction, MetricChange, PushRecord, SnapshotComparison,
    SnapshotKey,
};

/// Snapshot and transaction persistence.
pub trait SnapshotStore: Send + Sync {
    /// Record a transaction and make it the key's new current snapshot.
    ///
    /// Returns the new snapshot version.
    fn upsert(&self, transaction: BenchmarkTransaction) -> Result<u32, StoreError>;

    /// All snapshots for a key, oldest version first.
    fn get_history(&self, key: &SnapshotKey) -> Result<Vec<BenchmarkSnapshot>, StoreError>;

    fn current(&self, key: &SnapshotKey) -> Result<Option<BenchmarkSnapshot>, StoreError>;

    /// Mark an existing version current. Creates no version and no transaction.
    fn checkout(&self, key: &SnapshotKey, version: u32) -> Result<BenchmarkSnapshot, StoreError>;

    fn set_baseline(
        &self,
        key: &SnapshotKey,
        version: u32,
        is_baseline: bool,
    ) -> Result<BenchmarkSnapshot, StoreError>;

    fn baselines(&self, key: &SnapshotKey) -> Result<Vec<BenchmarkSnapshot>, StoreError>;

    /// The full transaction log, oldest first.
    fn transactions(&self) -> Result<Vec<BenchmarkTransaction>, StoreError>;

    /// Every key with at least one snapshot.
    fn keys(&self) -> Result<Vec<SnapshotKey>, StoreError>;

    /// Metric deltas from `from_version` to `to_version`. Read-only.
    fn compare(
        &self,
        key: &SnapshotKey,
        from_version: u32,
        to_version: u32,
    ) -> Result<SnapshotComparison, StoreError> {
        let history = self.get_history(key)?;
        let find = |version: u32| {
            history
                .iter()
                .find(|s| s.snapshot_version == version)
                .ok_or_else(|| StoreError::NotFound {
                    key: key.clone(),
                    version: Some(version),
                })
        };
        Ok(SnapshotComparison::between(find(from_version)?, find(to_version)?))
    }
}

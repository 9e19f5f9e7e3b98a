//! In-process store.
//!
//! Each key's history sits behind its own mutex, so writers on different
//! keys never contend. The outer map lock is held only to find or create
//! a key's slot.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::StoreError;
use crate::types::{BenchmarkSnapshot, BenchmarkTransaction, SnapshotKey};
use crate::SnapshotStore;

type History = Arc<Mutex<Vec<BenchmarkSnapshot>>>;

#[derive(Default)]
pub struct MemoryStore {
    transactions: Mutex<Vec<BenchmarkTransaction>>,
    snapshots: RwLock<HashMap<SnapshotKey, History>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &SnapshotKey) -> History {
        if let Some(history) = self.snapshots.read().get(key) {
            return history.clone();
        }
        self.snapshots.write().entry(key.clone()).or_default().clone()
    }

    fn existing(&self, key: &SnapshotKey) -> Option<History> {
        self.snapshots.read().get(key).cloned()
    }

    fn not_found(key: &SnapshotKey, version: Option<u32>) -> StoreError {
        StoreError::NotFound {
            key: key.clone(),
            version,
        }
    }
}

impl SnapshotStore for MemoryStore {
    fn upsert(&self, transaction: BenchmarkTransaction) -> Result<u32, StoreError> {
        let key = transaction.key();
        let slot = self.slot(&key);
        let mut history = slot.lock();

        let version = history
            .iter()
            .map(|s| s.snapshot_version)
            .max()
            .map_or(1, |v| v + 1);

        let snapshot = BenchmarkSnapshot::from_transaction(&transaction, version);
        self.transactions.lock().push(transaction);
        for existing in history.iter_mut() {
            existing.is_current = false;
        }
        history.push(snapshot);

        tracing::info!(key = %key, version, "Snapshot upserted");
        Ok(version)
    }

    fn get_history(&self, key: &SnapshotKey) -> Result<Vec<BenchmarkSnapshot>, StoreError> {
        Ok(self
            .existing(key)
            .map(|slot| slot.lock().clone())
            .unwrap_or_default())
    }

    fn current(&self, key: &SnapshotKey) -> Result<Option<BenchmarkSnapshot>, StoreError> {
        Ok(self
            .existing(key)
            .and_then(|slot| slot.lock().iter().find(|s| s.is_current).cloned()))
    }

    fn checkout(&self, key: &SnapshotKey, version: u32) -> Result<BenchmarkSnapshot, StoreError> {
        let slot = self.existing(key).ok_or_else(|| Self::not_found(key, Some(version)))?;
        let mut history = slot.lock();
        if !history.iter().any(|s| s.snapshot_version == version) {
            return Err(Self::not_found(key, Some(version)));
        }

        for snapshot in history.iter_mut() {
            snapshot.is_current = snapshot.snapshot_version == version;
        }
        tracing::info!(key = %key, version, "Snapshot checked out");

        history
            .iter()
            .find(|s| s.snapshot_version == version)
            .cloned()
            .ok_or_else(|| Self::not_found(key, Some(version)))
    }

    fn set_baseline(
        &self,
        key: &SnapshotKey,
        version: u32,
        is_baseline: bool,
    ) -> Result<BenchmarkSnapshot, StoreError> {
        let slot = self.existing(key).ok_or_else(|| Self::not_found(key, Some(version)))?;
        let mut history = slot.lock();
        let snapshot = history
            .iter_mut()
            .find(|s| s.snapshot_version == version)
            .ok_or_else(|| Self::not_found(key, Some(version)))?;

        snapshot.is_baseline = is_baseline;
        tracing::info!(key = %key, version, is_baseline, "Baseline flag updated");
        Ok(snapshot.clone())
    }

    fn baselines(&self, key: &SnapshotKey) -> Result<Vec<BenchmarkSnapshot>, StoreError> {
        Ok(self
            .get_history(key)?
            .into_iter()
            .filter(|s| s.is_baseline)
            .collect())
    }

    fn transactions(&self) -> Result<Vec<BenchmarkTransaction>, StoreError> {
        Ok(self.transactions.lock().clone())
    }

    fn keys(&self) -> Result<Vec<SnapshotKey>, StoreError> {
        let mut keys: Vec<SnapshotKey> = self
            .snapshots
            .read()
            .iter()
            .filter(|(_, history)| !history.lock().is_empty())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;

    #[test]
    fn test_upsert_is_monotonic() {
        conformance::upsert_is_monotonic(&MemoryStore::new());
    }

    #[test]
    fn test_keys_are_independent() {
        conformance::keys_are_independent(&MemoryStore::new());
    }

    #[test]
    fn test_checkout_does_not_create_versions() {
        conformance::checkout_does_not_create_versions(&MemoryStore::new());
    }

    #[test]
    fn test_checkout_missing_version() {
        conformance::checkout_missing_version(&MemoryStore::new());
    }

    #[test]
    fn test_baselines() {
        conformance::baselines(&MemoryStore::new());
    }

    #[test]
    fn test_compare_is_read_only() {
        conformance::compare_is_read_only(&MemoryStore::new());
    }

    #[test]
    fn test_concurrent_upserts_serialize() {
        conformance::concurrent_upserts_serialize(Arc::new(MemoryStore::new()));
    }

    #[test]
    fn test_unknown_key_is_empty() {
        let store = MemoryStore::new();
        let key = conformance::key();
        assert!(store.get_history(&key).unwrap().is_empty());
        assert!(store.current(&key).unwrap().is_none());
        assert!(store.keys().unwrap().is_empty());
        assert!(matches!(store.checkout(&key, 1), Err(StoreError::NotFound { .. })));
    }
}

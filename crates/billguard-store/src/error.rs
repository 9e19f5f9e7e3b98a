use thiserror::Error;

use crate::types::SnapshotKey;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no snapshot for {key}{}", version_suffix(.version))]
    NotFound {
        key: SnapshotKey,
        version: Option<u32>,
    },

    /// Two snapshots claimed the same version. Upserts serialize per key, so
    /// this means the store's invariant was broken.
    #[error("snapshot version conflict for {key}: version {version} already exists")]
    VersionConflict { key: SnapshotKey, version: u32 },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("migration v{version} failed: {reason}")]
    Migration { version: i64, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

fn version_suffix(version: &Option<u32>) -> String {
    version.map(|v| format!(" at version {}", v)).unwrap_or_default()
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

//! SQLite-backed store.
//!
//! Every write runs in an immediate transaction, so concurrent writers
//! (threads sharing this store, or other processes on the same file)
//! serialize at the database. A partial unique index backs the
//! one-current-snapshot invariant.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, Row, Transaction, TransactionBehavior};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{BenchmarkSnapshot, BenchmarkTransaction, SnapshotKey};
use crate::SnapshotStore;

const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../migrations/001_initial.sql"))];

const KEY_FILTER: &str =
    "model_version = ?1 AND dataset_version = ?2 AND prompt_version = ?3 AND environment = ?4";

const SNAPSHOT_COLUMNS: &str = "model_version, dataset_version, prompt_version, environment, \
     snapshot_version, transaction_id, is_current, is_baseline, precision_score, recall_score, \
     f1_score, latency_ms, cost_usd, metrics, created_at";

const TRANSACTION_COLUMNS: &str = "id, created_at, commit_sha, branch_name, run_id, triggered_by, \
     model_version, model_provider, dataset_version, dataset_size, prompt_version, environment, \
     metrics, duration_seconds";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file and run pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::init(Connection::open(path.as_ref())?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    apply_migrations(conn, MIGRATIONS)
}

/// Each migration commits atomically with its `schema_version` row. The
/// version is re-read under the write lock so concurrent openers apply a
/// migration once.
fn apply_migrations(conn: &Connection, migrations: &[(i64, &str)]) -> Result<(), StoreError> {
    for (version, sql) in migrations {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        if *version <= schema_version(&tx) {
            continue;
        }

        tracing::info!(version, "Running store migration");
        let migration_failed = |e: rusqlite::Error| StoreError::Migration {
            version: *version,
            reason: e.to_string(),
        };
        tx.execute_batch(sql).map_err(migration_failed)?;
        tx.commit().map_err(migration_failed)?;
    }
    Ok(())
}

/// 0 before the first migration.
fn schema_version(conn: &Connection) -> i64 {
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, Option<i64>>(0)
    })
    .ok()
    .flatten()
    .unwrap_or(0)
}

fn key_params(key: &SnapshotKey) -> (&str, &str, &str, &str) {
    (
        &key.model_version,
        &key.dataset_version,
        &key.prompt_version,
        &key.environment,
    )
}

fn key_version_params(key: &SnapshotKey, version: u32) -> (&str, &str, &str, &str, i64) {
    (
        &key.model_version,
        &key.dataset_version,
        &key.prompt_version,
        &key.environment,
        i64::from(version),
    )
}

fn corrupt(what: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Serialization(format!("invalid {} in store: {}", what, e))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt("timestamp", e))
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| corrupt("id", e))
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

struct SnapshotRow {
    model_version: String,
    dataset_version: String,
    prompt_version: String,
    environment: String,
    snapshot_version: i64,
    transaction_id: String,
    is_current: bool,
    is_baseline: bool,
    precision: Option<f64>,
    recall: Option<f64>,
    f1: Option<f64>,
    latency_ms: Option<f64>,
    cost_usd: Option<f64>,
    metrics: String,
    created_at: String,
}

impl SnapshotRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            model_version: row.get(0)?,
            dataset_version: row.get(1)?,
            prompt_version: row.get(2)?,
            environment: row.get(3)?,
            snapshot_version: row.get(4)?,
            transaction_id: row.get(5)?,
            is_current: row.get(6)?,
            is_baseline: row.get(7)?,
            precision: row.get(8)?,
            recall: row.get(9)?,
            f1: row.get(10)?,
            latency_ms: row.get(11)?,
            cost_usd: row.get(12)?,
            metrics: row.get(13)?,
            created_at: row.get(14)?,
        })
    }
}

impl TryFrom<SnapshotRow> for BenchmarkSnapshot {
    type Error = StoreError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        Ok(Self {
            key: SnapshotKey::new(
                row.model_version,
                row.dataset_version,
                row.prompt_version,
                row.environment,
            ),
            snapshot_version: u32::try_from(row.snapshot_version)
                .map_err(|e| corrupt("snapshot version", e))?,
            transaction_id: parse_uuid(&row.transaction_id)?,
            is_current: row.is_current,
            is_baseline: row.is_baseline,
            precision: row.precision,
            recall: row.recall,
            f1: row.f1,
            latency_ms: row.latency_ms,
            cost_usd: row.cost_usd,
            metrics: serde_json::from_str(&row.metrics)?,
            created_at: parse_time(&row.created_at)?,
        })
    }
}

struct TransactionRow {
    id: String,
    created_at: String,
    commit_sha: Option<String>,
    branch_name: Option<String>,
    run_id: Option<String>,
    triggered_by: Option<String>,
    model_version: String,
    model_provider: String,
    dataset_version: String,
    dataset_size: i64,
    prompt_version: String,
    environment: String,
    metrics: String,
    duration_seconds: f64,
}

impl TransactionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            commit_sha: row.get(2)?,
            branch_name: row.get(3)?,
            run_id: row.get(4)?,
            triggered_by: row.get(5)?,
            model_version: row.get(6)?,
            model_provider: row.get(7)?,
            dataset_version: row.get(8)?,
            dataset_size: row.get(9)?,
            prompt_version: row.get(10)?,
            environment: row.get(11)?,
            metrics: row.get(12)?,
            duration_seconds: row.get(13)?,
        })
    }
}

impl TryFrom<TransactionRow> for BenchmarkTransaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            created_at: parse_time(&row.created_at)?,
            commit_sha: row.commit_sha,
            branch_name: row.branch_name,
            run_id: row.run_id,
            triggered_by: row.triggered_by,
            model_version: row.model_version,
            model_provider: row.model_provider,
            dataset_version: row.dataset_version,
            dataset_size: usize::try_from(row.dataset_size).map_err(|e| corrupt("dataset size", e))?,
            prompt_version: row.prompt_version,
            environment: row.environment,
            metrics: serde_json::from_str(&row.metrics)?,
            duration_seconds: row.duration_seconds,
        })
    }
}

fn query_snapshots(
    conn: &Connection,
    key: &SnapshotKey,
    extra_filter: &str,
) -> Result<Vec<BenchmarkSnapshot>, StoreError> {
    let sql = format!(
        "SELECT {} FROM benchmark_snapshots WHERE {} {} ORDER BY snapshot_version ASC",
        SNAPSHOT_COLUMNS, KEY_FILTER, extra_filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(key_params(key), SnapshotRow::read)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(BenchmarkSnapshot::try_from).collect()
}

fn query_snapshot(conn: &Connection, key: &SnapshotKey, version: u32) -> Result<BenchmarkSnapshot, StoreError> {
    let sql = format!(
        "SELECT {} FROM benchmark_snapshots WHERE {} AND snapshot_version = ?5",
        SNAPSHOT_COLUMNS, KEY_FILTER
    );
    let row = conn
        .query_row(&sql, key_version_params(key, version), SnapshotRow::read)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                key: key.clone(),
                version: Some(version),
            },
            other => StoreError::Database(other),
        })?;
    BenchmarkSnapshot::try_from(row)
}

fn insert_transaction(conn: &Connection, tx: &BenchmarkTransaction) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT INTO benchmark_transactions ({}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            TRANSACTION_COLUMNS
        ),
        params![
            tx.id.to_string(),
            tx.created_at.to_rfc3339(),
            tx.commit_sha,
            tx.branch_name,
            tx.run_id,
            tx.triggered_by,
            tx.model_version,
            tx.model_provider,
            tx.dataset_version,
            tx.dataset_size as i64,
            tx.prompt_version,
            tx.environment,
            serde_json::to_string(&tx.metrics)?,
            tx.duration_seconds,
        ],
    )?;
    Ok(())
}

fn insert_snapshot(conn: &Connection, snapshot: &BenchmarkSnapshot) -> Result<(), rusqlite::Error> {
    let metrics = serde_json::to_string(&snapshot.metrics)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        &format!(
            "INSERT INTO benchmark_snapshots ({}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            SNAPSHOT_COLUMNS
        ),
        params![
            snapshot.key.model_version,
            snapshot.key.dataset_version,
            snapshot.key.prompt_version,
            snapshot.key.environment,
            i64::from(snapshot.snapshot_version),
            snapshot.transaction_id.to_string(),
            snapshot.is_current,
            snapshot.is_baseline,
            snapshot.precision,
            snapshot.recall,
            snapshot.f1,
            snapshot.latency_ms,
            snapshot.cost_usd,
            metrics,
            snapshot.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

impl SnapshotStore for SqliteStore {
    fn upsert(&self, transaction: BenchmarkTransaction) -> Result<u32, StoreError> {
        let key = transaction.key();
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        insert_transaction(&tx, &transaction)?;

        let max: Option<i64> = tx.query_row(
            &format!("SELECT MAX(snapshot_version) FROM benchmark_snapshots WHERE {}", KEY_FILTER),
            key_params(&key),
            |row| row.get(0),
        )?;
        let version = u32::try_from(max.unwrap_or(0) + 1).map_err(|e| corrupt("snapshot version", e))?;

        tx.execute(
            &format!("UPDATE benchmark_snapshots SET is_current = 0 WHERE {} AND is_current = 1", KEY_FILTER),
            key_params(&key),
        )?;

        let snapshot = BenchmarkSnapshot::from_transaction(&transaction, version);
        insert_snapshot(&tx, &snapshot).map_err(|e| {
            if is_constraint_violation(&e) {
                tracing::error!(key = %key, version, "Snapshot version conflict");
                StoreError::VersionConflict {
                    key: key.clone(),
                    version,
                }
            } else {
                StoreError::Database(e)
            }
        })?;

        tx.commit()?;
        tracing::info!(key = %key, version, "Snapshot upserted");
        Ok(version)
    }

    fn get_history(&self, key: &SnapshotKey) -> Result<Vec<BenchmarkSnapshot>, StoreError> {
        query_snapshots(&self.conn.lock(), key, "")
    }

    fn current(&self, key: &SnapshotKey) -> Result<Option<BenchmarkSnapshot>, StoreError> {
        Ok(query_snapshots(&self.conn.lock(), key, "AND is_current = 1")?
            .into_iter()
            .next())
    }

    fn checkout(&self, key: &SnapshotKey, version: u32) -> Result<BenchmarkSnapshot, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Fails with NotFound before anything is written
        query_snapshot(&tx, key, version)?;

        tx.execute(
            &format!("UPDATE benchmark_snapshots SET is_current = 0 WHERE {} AND is_current = 1", KEY_FILTER),
            key_params(key),
        )?;
        tx.execute(
            &format!(
                "UPDATE benchmark_snapshots SET is_current = 1 WHERE {} AND snapshot_version = ?5",
                KEY_FILTER
            ),
            key_version_params(key, version),
        )?;
        let snapshot = query_snapshot(&tx, key, version)?;
        tx.commit()?;

        tracing::info!(key = %key, version, "Snapshot checked out");
        Ok(snapshot)
    }

    fn set_baseline(
        &self,
        key: &SnapshotKey,
        version: u32,
        is_baseline: bool,
    ) -> Result<BenchmarkSnapshot, StoreError> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            &format!(
                "UPDATE benchmark_snapshots SET is_baseline = ?6 WHERE {} AND snapshot_version = ?5",
                KEY_FILTER
            ),
            params![
                key.model_version,
                key.dataset_version,
                key.prompt_version,
                key.environment,
                i64::from(version),
                is_baseline,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                key: key.clone(),
                version: Some(version),
            });
        }

        tracing::info!(key = %key, version, is_baseline, "Baseline flag updated");
        query_snapshot(&conn, key, version)
    }

    fn baselines(&self, key: &SnapshotKey) -> Result<Vec<BenchmarkSnapshot>, StoreError> {
        query_snapshots(&self.conn.lock(), key, "AND is_baseline = 1")
    }

    fn transactions(&self) -> Result<Vec<BenchmarkTransaction>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM benchmark_transactions ORDER BY rowid ASC",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], TransactionRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(BenchmarkTransaction::try_from).collect()
    }

    fn keys(&self) -> Result<Vec<SnapshotKey>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT model_version, dataset_version, prompt_version, environment \
             FROM benchmark_snapshots ORDER BY 1, 2, 3, 4",
        )?;
        let keys = stmt
            .query_map([], |row| {
                Ok(SnapshotKey::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

//! Transactions, snapshots and comparisons.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Identifies one benchmark configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub model_version: String,
    pub dataset_version: String,
    pub prompt_version: String,
    pub environment: String,
}

impl SnapshotKey {
    pub fn new(
        model_version: impl Into<String>,
        dataset_version: impl Into<String>,
        prompt_version: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            model_version: model_version.into(),
            dataset_version: dataset_version.into(),
            prompt_version: prompt_version.into(),
            environment: environment.into(),
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.model_version, self.dataset_version, self.prompt_version, self.environment
        )
    }
}

/// Payload a benchmark run pushes to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRecord {
    pub model_version: String,
    pub model_provider: String,
    pub dataset_version: String,
    #[serde(default)]
    pub dataset_size: usize,
    pub prompt_version: String,
    pub environment: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub triggered_by: Option<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub duration_seconds: f64,
}

/// One benchmark run. Never modified once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkTransaction {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub commit_sha: Option<String>,
    pub branch_name: Option<String>,
    pub run_id: Option<String>,
    pub triggered_by: Option<String>,
    pub model_version: String,
    pub model_provider: String,
    pub dataset_version: String,
    pub dataset_size: usize,
    pub prompt_version: String,
    pub environment: String,
    pub metrics: BTreeMap<String, JsonValue>,
    pub duration_seconds: f64,
}

impl BenchmarkTransaction {
    pub fn from_push_record(record: PushRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            commit_sha: record.commit_sha,
            branch_name: record.branch_name,
            run_id: record.run_id,
            triggered_by: record.triggered_by,
            model_version: record.model_version,
            model_provider: record.model_provider,
            dataset_version: record.dataset_version,
            dataset_size: record.dataset_size,
            prompt_version: record.prompt_version,
            environment: record.environment,
            metrics: record.metrics,
            duration_seconds: record.duration_seconds,
        }
    }

    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(
            &self.model_version,
            &self.dataset_version,
            &self.prompt_version,
            &self.environment,
        )
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).and_then(JsonValue::as_f64)
    }
}

/// A versioned view of one configuration's metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSnapshot {
    pub key: SnapshotKey,
    pub snapshot_version: u32,
    pub transaction_id: Uuid,
    pub is_current: bool,
    pub is_baseline: bool,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    pub latency_ms: Option<f64>,
    pub cost_usd: Option<f64>,
    pub metrics: BTreeMap<String, JsonValue>,
    pub created_at: DateTime<Utc>,
}

impl BenchmarkSnapshot {
    /// New current, non-baseline snapshot with metrics copied from `tx`.
    pub fn from_transaction(tx: &BenchmarkTransaction, version: u32) -> Self {
        Self {
            key: tx.key(),
            snapshot_version: version,
            transaction_id: tx.id,
            is_current: true,
            is_baseline: false,
            precision: tx.metric("precision"),
            recall: tx.metric("recall"),
            f1: tx.metric("f1"),
            latency_ms: tx.metric("latency_mean_ms"),
            cost_usd: tx.metric("total_cost_usd"),
            metrics: tx.metrics.clone(),
            created_at: tx.created_at,
        }
    }

    /// Numeric top-level metrics, by name.
    pub fn numeric_metrics(&self) -> BTreeMap<&str, f64> {
        self.metrics
            .iter()
            .filter_map(|(name, value)| value.as_f64().map(|v| (name.as_str(), v)))
            .collect()
    }
}

/// Change in one metric between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricChange {
    pub metric: String,
    pub from: f64,
    pub to: f64,
    /// `to - from`; negative when the metric went down
    pub absolute_change: f64,
    /// Relative to `from`; `None` when `from` is zero
    pub percent_change: Option<f64>,
}

impl MetricChange {
    pub fn new(metric: impl Into<String>, from: f64, to: f64) -> Self {
        let absolute_change = to - from;
        Self {
            metric: metric.into(),
            from,
            to,
            absolute_change,
            percent_change: (from != 0.0).then(|| absolute_change / from.abs() * 100.0),
        }
    }
}

/// Per-metric deltas from one snapshot version to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotComparison {
    pub key: SnapshotKey,
    pub from_version: u32,
    pub to_version: u32,
    pub changes: Vec<MetricChange>,
}

impl SnapshotComparison {
    /// Compare every numeric metric present in both snapshots.
    pub fn between(from: &BenchmarkSnapshot, to: &BenchmarkSnapshot) -> Self {
        let after = to.numeric_metrics();
        let changes = from
            .numeric_metrics()
            .into_iter()
            .filter_map(|(name, before)| after.get(name).map(|&now| MetricChange::new(name, before, now)))
            .collect();

        Self {
            key: from.key.clone(),
            from_version: from.snapshot_version,
            to_version: to.snapshot_version,
            changes,
        }
    }

    pub fn change(&self, metric: &str) -> Option<&MetricChange> {
        self.changes.iter().find(|c| c.metric == metric)
    }
}

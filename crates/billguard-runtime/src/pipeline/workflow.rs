//! Append-only workflow log.
//!
//! Stages never mutate an existing log: [`WorkflowLog::with_stage`] consumes
//! the log and returns it with one more record, so concurrent runs each
//! build their own trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PreExtraction,
    Extraction,
    LineItemParsing,
    Analysis,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::PreExtraction => "pre_extraction",
            Stage::Extraction => "extraction",
            Stage::LineItemParsing => "line_item_parsing",
            Stage::Analysis => "analysis",
            Stage::Complete => "complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

/// One stage's entry in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    #[serde(default)]
    pub data: JsonValue,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StageRecord {
    pub fn completed(stage: Stage, data: JsonValue) -> Self {
        Self {
            stage,
            status: StageStatus::Completed,
            data,
            error: None,
            duration_ms: 0,
        }
    }

    pub fn failed(stage: Stage, data: JsonValue, error: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            data,
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    pub fn skipped(stage: Stage, reason: &str) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            data: serde_json::json!({ "reason": reason }),
            error: None,
            duration_ms: 0,
        }
    }

    pub fn cancelled(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Cancelled,
            data: JsonValue::Null,
            error: Some("run cancelled".to_string()),
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = elapsed.as_millis() as u64;
        self
    }
}

/// Trace of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowLog {
    /// Unique per run
    pub workflow_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Stable across runs with the same input and configuration
    pub replay_key: String,
    pub stages: Vec<StageRecord>,
}

impl WorkflowLog {
    pub fn new(replay_key: impl Into<String>) -> Self {
        Self {
            workflow_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            replay_key: replay_key.into(),
            stages: Vec::new(),
        }
    }

    /// Append a stage record.
    pub fn with_stage(mut self, record: StageRecord) -> Self {
        self.stages.push(record);
        self
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    pub fn last_stage(&self) -> Option<&StageRecord> {
        self.stages.last()
    }

    /// True when any stage recorded a failure.
    pub fn has_failures(&self) -> bool {
        self.stages.iter().any(|r| r.status == StageStatus::Failed)
    }
}

/// Hex SHA-256 over everything that determines a run's deterministic output.
pub fn replay_key(text: &str, provider_key: &str, extractor_config: &str, rules: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [text, provider_key, extractor_config, rules] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

//! Benchmark scoring.
//!
//! Ground-truth cases, category-keyed issue matching, and micro-averaged
//! precision/recall/F1. Running cases through a pipeline lives in the
//! runtime crate; everything here is pure arithmetic over issue lists.

mod matching;
mod metrics;

pub use matching::{match_issues, CaseMatch};
pub use metrics::{
    savings_accuracy, CategoryMetrics, MatchCounts, MetricsAccumulator, SavingsAccuracy,
    DEFAULT_SAVINGS_TOLERANCE,
};

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::types::{IssueCategory, Severity};

fn default_true() -> bool {
    true
}

/// One human-annotated issue a case is expected to surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedIssue {
    pub category: IssueCategory,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub expected_savings: Option<Decimal>,
    /// `false` marks issues too subtle to require; they never count as misses
    #[serde(default = "default_true")]
    pub should_detect: bool,
}

impl ExpectedIssue {
    pub fn required(category: impl Into<IssueCategory>) -> Self {
        Self {
            category: category.into(),
            severity: None,
            description: String::new(),
            expected_savings: None,
            should_detect: true,
        }
    }

    pub fn optional(category: impl Into<IssueCategory>) -> Self {
        Self {
            should_detect: false,
            ..Self::required(category)
        }
    }
}

/// A benchmark input with its ground truth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkCase {
    /// Base filename of the input document
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub input_text: String,
    #[serde(default)]
    pub expected_issues: Vec<ExpectedIssue>,
    /// Fact-set-shaped mapping; advisory only
    #[serde(default)]
    pub expected_facts: BTreeMap<String, JsonValue>,
}

impl BenchmarkCase {
    /// True when at least one expected issue must be detected.
    pub fn is_high_signal(&self) -> bool {
        self.expected_issues.iter().any(|i| i.should_detect)
    }

    /// Sum of `expected_savings` over issues that must be detected.
    /// Saturates at `Decimal::MAX`.
    pub fn expected_savings(&self) -> Decimal {
        self.expected_issues
            .iter()
            .filter(|i| i.should_detect)
            .filter_map(|i| i.expected_savings)
            .fold(Decimal::ZERO, Decimal::saturating_add)
    }
}

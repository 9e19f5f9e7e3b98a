//! Precision, recall, F1 and savings accuracy.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::IssueCategory;

use super::matching::CaseMatch;
use super::ExpectedIssue;

/// Relative savings error accepted as "accurate" unless configured otherwise.
pub const DEFAULT_SAVINGS_TOLERANCE: f64 = 0.20;

/// True/false positive/negative counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCounts {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl MatchCounts {
    /// TP / (TP + FP), 0 when nothing was detected.
    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    /// TP / (TP + FN), 0 when nothing was expected.
    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    pub fn add(&mut self, other: &MatchCounts) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
    }
}

/// Scores for one issue category across a benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMetrics {
    pub category: IssueCategory,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    /// Matched issues of this category, required or optional (equals `true_positives`)
    pub total_detected: usize,
    /// Required issues of this category that were missed
    pub total_missed: usize,
    /// Successful cases requiring at least one issue of this category
    pub total_cases: usize,
}

/// Relative error between detected and expected savings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SavingsAccuracy {
    pub detected: Decimal,
    pub expected: Decimal,
    pub relative_error: f64,
    pub within_tolerance: bool,
}

/// `|detected - expected| / expected`, or 0 when nothing was expected.
pub fn savings_accuracy(detected: Decimal, expected: Decimal, tolerance: f64) -> SavingsAccuracy {
    let relative_error = if expected.is_zero() {
        0.0
    } else {
        detected
            .checked_sub(expected)
            .and_then(|diff| diff.abs().checked_div(expected.abs()))
            .and_then(|e| e.to_f64())
            .unwrap_or(f64::INFINITY)
    };
    SavingsAccuracy {
        detected,
        expected,
        relative_error,
        within_tolerance: relative_error <= tolerance,
    }
}

/// Micro-averaging accumulator over successful cases.
#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    overall: MatchCounts,
    by_category: BTreeMap<IssueCategory, MatchCounts>,
    cases_per_category: BTreeMap<IssueCategory, usize>,
    cases: usize,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one successful case into the totals.
    pub fn add_case(&mut self, expected: &[ExpectedIssue], result: &CaseMatch) {
        self.cases += 1;
        self.overall.add(&result.counts);
        for (category, counts) in &result.by_category {
            self.by_category.entry(category.clone()).or_default().add(counts);
        }

        let required: BTreeSet<&IssueCategory> = expected
            .iter()
            .filter(|e| e.should_detect)
            .map(|e| &e.category)
            .collect();
        for category in required {
            *self.cases_per_category.entry(category.clone()).or_insert(0) += 1;
        }
    }

    pub fn cases(&self) -> usize {
        self.cases
    }

    pub fn overall(&self) -> MatchCounts {
        self.overall
    }

    /// Per-category metrics, ordered by category name.
    pub fn categories(&self) -> Vec<CategoryMetrics> {
        self.by_category
            .iter()
            .map(|(category, counts)| CategoryMetrics {
                category: category.clone(),
                precision: counts.precision(),
                recall: counts.recall(),
                f1: counts.f1(),
                true_positives: counts.true_positives,
                false_positives: counts.false_positives,
                total_detected: counts.true_positives,
                total_missed: counts.false_negatives,
                total_cases: self.cases_per_category.get(category).copied().unwrap_or(0),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::match_issues;
    use crate::types::{Issue, Severity};
    use proptest::prelude::*;

    fn issue(category: &str) -> Issue {
        Issue::from_provider(category, Severity::Low, category, "", Decimal::ZERO)
    }

    #[test]
    fn test_zero_everything_is_zero_not_nan() {
        let counts = MatchCounts::default();
        assert_eq!(counts.precision(), 0.0);
        assert_eq!(counts.recall(), 0.0);
        assert_eq!(counts.f1(), 0.0);
    }

    #[test]
    fn test_detections_without_expectations() {
        let counts = MatchCounts {
            false_positives: 3,
            ..Default::default()
        };
        assert_eq!(counts.precision(), 0.0);
        assert_eq!(counts.recall(), 0.0);
    }

    #[test]
    fn test_micro_average_across_cases() {
        let mut acc = MetricsAccumulator::new();

        // Case 1: perfect on a single issue
        let expected_one = vec![ExpectedIssue::required("a")];
        acc.add_case(&expected_one, &match_issues(&expected_one, &[issue("a")]));

        // Case 2: nothing expected, one false positive
        acc.add_case(&[], &match_issues(&[], &[issue("b")]));

        let overall = acc.overall();
        assert_eq!(acc.cases(), 2);
        assert_eq!(overall.true_positives, 1);
        assert_eq!(overall.false_positives, 1);
        assert!((overall.precision() - 0.5).abs() < 1e-9);
        assert_eq!(overall.recall(), 1.0);
    }

    #[test]
    fn test_category_case_counts() {
        let mut acc = MetricsAccumulator::new();
        let expected = vec![ExpectedIssue::required("a"), ExpectedIssue::required("a")];
        acc.add_case(&expected, &match_issues(&expected, &[issue("a")]));
        acc.add_case(&expected, &match_issues(&expected, &[]));

        let cats = acc.categories();
        assert_eq!(cats.len(), 1);
        assert_eq!(cats[0].total_detected, 1);
        assert_eq!(cats[0].total_missed, 3);
        assert_eq!(cats[0].total_cases, 2);
    }

    #[test]
    fn test_optional_matches_count_as_detected() {
        let mut acc = MetricsAccumulator::new();
        let expected = vec![ExpectedIssue::optional("a")];
        acc.add_case(&expected, &match_issues(&expected, &[issue("a")]));

        let cats = acc.categories();
        assert_eq!(cats[0].true_positives, 1);
        assert_eq!(cats[0].total_detected, cats[0].true_positives);
        assert_eq!(cats[0].total_missed, 0);
        assert_eq!(cats[0].total_cases, 0);
    }

    #[test]
    fn test_savings_accuracy_overflow_is_infinite() {
        let accuracy = savings_accuracy(Decimal::MAX, Decimal::MIN, 0.2);
        assert_eq!(accuracy.relative_error, f64::INFINITY);
        assert!(!accuracy.within_tolerance);
    }

    #[test]
    fn test_savings_accuracy() {
        let exact = savings_accuracy(Decimal::new(100, 0), Decimal::new(100, 0), 0.2);
        assert_eq!(exact.relative_error, 0.0);
        assert!(exact.within_tolerance);

        let off = savings_accuracy(Decimal::new(150, 0), Decimal::new(100, 0), 0.2);
        assert!((off.relative_error - 0.5).abs() < 1e-9);
        assert!(!off.within_tolerance);

        let nothing_expected = savings_accuracy(Decimal::new(40, 0), Decimal::ZERO, 0.2);
        assert_eq!(nothing_expected.relative_error, 0.0);
    }

    proptest! {
        #[test]
        fn prop_metrics_bounded(tp in 0usize..100, fp in 0usize..100, fn_ in 0usize..100) {
            let counts = MatchCounts { true_positives: tp, false_positives: fp, false_negatives: fn_ };
            for value in [counts.precision(), counts.recall(), counts.f1()] {
                prop_assert!(value.is_finite());
                prop_assert!((0.0..=1.0).contains(&value));
            }
        }
    }
}

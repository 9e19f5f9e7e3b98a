//! Category-keyed greedy matching of detected issues against ground truth.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Issue, IssueCategory};

use super::metrics::MatchCounts;
use super::ExpectedIssue;

/// Outcome of matching one case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseMatch {
    /// Counts over the whole case
    pub counts: MatchCounts,
    /// Counts partitioned by category
    pub by_category: BTreeMap<IssueCategory, MatchCounts>,
    /// Categories of false positives, in detection order
    pub false_positives: Vec<IssueCategory>,
    /// Categories of required issues nobody detected
    pub missed: Vec<IssueCategory>,
}

/// Match detected issues against expected issues by category.
///
/// Each detected issue consumes the first unused required expectation of its
/// category, then the first unused optional one. Anything left unmatched on
/// the detected side is a false positive; unmatched required expectations
/// are false negatives. Unmatched optional expectations count for nothing.
pub fn match_issues(expected: &[ExpectedIssue], detected: &[Issue]) -> CaseMatch {
    let mut used = vec![false; expected.len()];
    let mut result = CaseMatch::default();

    let take = |used: &mut [bool], category: &IssueCategory, required: bool| {
        let slot = expected
            .iter()
            .enumerate()
            .position(|(i, e)| !used[i] && e.should_detect == required && e.category == *category)?;
        used[slot] = true;
        Some(slot)
    };

    for issue in detected {
        let matched = take(&mut used, &issue.category, true)
            .or_else(|| take(&mut used, &issue.category, false));
        let entry = result.by_category.entry(issue.category.clone()).or_default();

        if matched.is_some() {
            result.counts.true_positives += 1;
            entry.true_positives += 1;
        } else {
            result.counts.false_positives += 1;
            entry.false_positives += 1;
            result.false_positives.push(issue.category.clone());
        }
    }

    for (expectation, _) in expected
        .iter()
        .zip(used.iter())
        .filter(|(e, used)| e.should_detect && !**used)
    {
        result.counts.false_negatives += 1;
        result
            .by_category
            .entry(expectation.category.clone())
            .or_default()
            .false_negatives += 1;
        result.missed.push(expectation.category.clone());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;
    use rust_decimal::Decimal;

    fn detected(category: &str) -> Issue {
        Issue::from_provider(category, Severity::Medium, category, "", Decimal::ZERO)
    }

    #[test]
    fn test_multiset_matching() {
        let expected = vec![
            ExpectedIssue::required("a"),
            ExpectedIssue::required("a"),
            ExpectedIssue::required("b"),
        ];
        let found = vec![detected("a"), detected("b"), detected("c")];

        let result = match_issues(&expected, &found);
        assert_eq!(result.counts.true_positives, 2);
        assert_eq!(result.counts.false_positives, 1);
        assert_eq!(result.counts.false_negatives, 1);
        assert_eq!(result.false_positives, vec![IssueCategory::from("c")]);
        assert_eq!(result.missed, vec![IssueCategory::from("a")]);
        assert!((result.counts.precision() - 2.0 / 3.0).abs() < 1e-9);
        assert!((result.counts.recall() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_optional_miss_is_not_a_false_negative() {
        let expected = vec![ExpectedIssue::optional("late_fee")];
        let result = match_issues(&expected, &[]);
        assert_eq!(result.counts, MatchCounts::default());
    }

    #[test]
    fn test_optional_hit_is_a_true_positive() {
        let expected = vec![ExpectedIssue::optional("late_fee")];
        let result = match_issues(&expected, &[detected("late_fee")]);
        assert_eq!(result.counts.true_positives, 1);
        assert_eq!(result.counts.false_positives, 0);
    }

    #[test]
    fn test_required_consumed_before_optional() {
        let expected = vec![ExpectedIssue::optional("x"), ExpectedIssue::required("x")];
        let result = match_issues(&expected, &[detected("x")]);
        assert_eq!(result.counts.true_positives, 1);
        assert_eq!(result.counts.false_negatives, 0);
    }

    #[test]
    fn test_per_category_partition() {
        let expected = vec![ExpectedIssue::required("a"), ExpectedIssue::required("b")];
        let result = match_issues(&expected, &[detected("a"), detected("a")]);

        let a = result.by_category[&IssueCategory::from("a")];
        assert_eq!((a.true_positives, a.false_positives, a.false_negatives), (1, 1, 0));
        let b = result.by_category[&IssueCategory::from("b")];
        assert_eq!((b.true_positives, b.false_positives, b.false_negatives), (0, 0, 1));
    }
}

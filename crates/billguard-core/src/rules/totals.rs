//! Statement total vs. itemized charges.

use crate::types::{categories, FactSet, Issue, Severity};

use super::{tolerance, BillingRule};

/// Flags a billed total that exceeds the sum of its line items.
pub struct TotalMismatchRule;

impl BillingRule for TotalMismatchRule {
    fn id(&self) -> &'static str {
        categories::TOTAL_MISMATCH
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<Issue> {
        let (Some(total), Some(itemized)) = (facts.total_charge, facts.line_items_total()) else {
            return Vec::new();
        };

        let Some(excess) = total.checked_sub(itemized) else {
            return Vec::new();
        };
        if excess <= tolerance() {
            return Vec::new();
        }

        vec![Issue::deterministic(
            categories::TOTAL_MISMATCH,
            Severity::Medium,
            "Billed total exceeds itemized charges",
            format!(
                "The statement total is ${} but the itemized lines add up to ${}.",
                total, itemized
            ),
            excess,
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::line;
    use rust_decimal::Decimal;

    #[test]
    fn test_fires_when_total_exceeds_items() {
        let facts = FactSet {
            total_charge: Some(Decimal::new(40000, 2)),
            line_items: vec![line(1, "99213", 15000, 1), line(2, "80053", 8550, 1)],
            ..Default::default()
        };
        let issues = TotalMismatchRule.evaluate(&facts);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].max_savings, Decimal::new(16450, 2));
    }

    #[test]
    fn test_matching_total_is_silent() {
        let facts = FactSet {
            total_charge: Some(Decimal::new(15000, 2)),
            line_items: vec![line(1, "99213", 15000, 1)],
            ..Default::default()
        };
        assert!(TotalMismatchRule.evaluate(&facts).is_empty());
    }

    #[test]
    fn test_overflowing_item_sum_is_silent() {
        let mut big = line(1, "99213", 0, 1);
        big.amount = Decimal::MAX;
        let facts = FactSet {
            total_charge: Some(Decimal::new(15000, 2)),
            line_items: vec![big.clone(), big],
            ..Default::default()
        };
        assert!(TotalMismatchRule.evaluate(&facts).is_empty());
    }

    #[test]
    fn test_requires_both_total_and_items() {
        let facts = FactSet {
            total_charge: Some(Decimal::new(15000, 2)),
            ..Default::default()
        };
        assert!(TotalMismatchRule.evaluate(&facts).is_empty());
    }
}

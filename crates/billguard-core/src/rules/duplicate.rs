//! Duplicate charge detection.
//!
//! Two or more line items with the same code, date and amount are billed
//! duplicates. Every copy beyond the first is recoverable.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::types::{categories, FactSet, Issue, Severity};

use super::BillingRule;

/// Flags repeated identical line items.
pub struct DuplicateChargeRule;

impl BillingRule for DuplicateChargeRule {
    fn id(&self) -> &'static str {
        categories::DUPLICATE_CHARGE
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<Issue> {
        // Groups in first-seen order: (code, date, amount) -> line numbers
        let mut groups: Vec<((&str, Option<NaiveDate>, Decimal), Vec<usize>)> = Vec::new();

        for item in &facts.line_items {
            let Some(code) = item.code.as_deref() else {
                continue;
            };
            let key = (code, item.date, item.amount);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, lines)) => lines.push(item.line_number),
                None => groups.push((key, vec![item.line_number])),
            }
        }

        groups
            .into_iter()
            .filter(|(_, lines)| lines.len() > 1)
            .filter_map(|((code, date, amount), lines)| {
                let recoverable = amount.checked_mul(Decimal::from(lines.len() - 1))?;
                let when = date
                    .map(|d| format!(" on {}", d))
                    .unwrap_or_default();
                let issue = Issue::deterministic(
                    categories::DUPLICATE_CHARGE,
                    Severity::High,
                    format!("Duplicate charge for {}", code),
                    format!(
                        "Code {} was billed {} times{} at ${} each (lines {}).",
                        code,
                        lines.len(),
                        when,
                        amount,
                        lines
                            .iter()
                            .map(|n| n.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                    recoverable,
                )
                .with_affected_items(vec![code.to_string()]);
                Some(issue)
            })
            .collect()
    }
}

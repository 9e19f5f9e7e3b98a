//! Patient-balance checks: amount due vs. stated responsibility, and EOB
//! claim rows where the patient is asked for more than allowed minus paid.

use rust_decimal::Decimal;

use crate::types::{categories, FactSet, Issue, Severity};

use super::{tolerance, BillingRule};

/// Flags an amount due larger than the stated patient responsibility.
pub struct PatientResponsibilityRule;

impl BillingRule for PatientResponsibilityRule {
    fn id(&self) -> &'static str {
        categories::PATIENT_RESPONSIBILITY_EXCEEDED
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<Issue> {
        let (Some(responsibility), Some(due)) = (facts.patient_responsibility, facts.amount_due) else {
            return Vec::new();
        };

        let Some(excess) = due.checked_sub(responsibility) else {
            return Vec::new();
        };
        if excess <= tolerance() {
            return Vec::new();
        }

        vec![Issue::deterministic(
            categories::PATIENT_RESPONSIBILITY_EXCEEDED,
            Severity::High,
            "Amount due exceeds patient responsibility",
            format!(
                "You are asked to pay ${} but your stated responsibility is ${}.",
                due, responsibility
            ),
            excess,
        )]
    }
}

/// Flags claim rows billing the patient above `allowed - paid`.
pub struct BalanceBillingRule;

impl BillingRule for BalanceBillingRule {
    fn id(&self) -> &'static str {
        categories::BALANCE_BILLING
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<Issue> {
        facts
            .line_items
            .iter()
            .filter_map(|item| {
                let allowed = item.allowed?;
                let paid = item.paid.unwrap_or(Decimal::ZERO);
                let owes = item.patient_owes?;
                let expected = allowed.checked_sub(paid)?.max(Decimal::ZERO);
                let excess = owes.checked_sub(expected)?;
                if excess <= tolerance() {
                    return None;
                }

                let code = item.code.clone().unwrap_or_else(|| format!("line {}", item.line_number));
                Some(
                    Issue::deterministic(
                        categories::BALANCE_BILLING,
                        Severity::High,
                        format!("Patient billed above allowed amount for {}", code),
                        format!(
                            "Allowed ${} minus plan payment ${} leaves ${}, but the patient owes ${}.",
                            allowed, paid, expected, owes
                        ),
                        excess,
                    )
                    .with_affected_items(vec![code]),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::line;

    #[test]
    fn test_amount_due_above_responsibility() {
        let facts = FactSet {
            patient_responsibility: Some(Decimal::new(5000, 2)),
            amount_due: Some(Decimal::new(12500, 2)),
            ..Default::default()
        };
        let issues = PatientResponsibilityRule.evaluate(&facts);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].max_savings, Decimal::new(7500, 2));
    }

    #[test]
    fn test_missing_amount_due_does_not_fire() {
        let facts = FactSet {
            patient_responsibility: Some(Decimal::new(5000, 2)),
            ..Default::default()
        };
        assert!(PatientResponsibilityRule.evaluate(&facts).is_empty());
    }

    #[test]
    fn test_balance_billing_on_claim_row() {
        let mut item = line(1, "99214", 20000, 10);
        item.allowed = Some(Decimal::new(12000, 2));
        item.paid = Some(Decimal::new(9600, 2));
        item.patient_owes = Some(Decimal::new(10400, 2));

        let facts = FactSet {
            line_items: vec![item],
            ..Default::default()
        };
        let issues = BalanceBillingRule.evaluate(&facts);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].max_savings, Decimal::new(8000, 2));
        assert_eq!(issues[0].affected_items, vec!["99214"]);
    }

    #[test]
    fn test_correct_claim_row_is_silent() {
        let mut item = line(1, "99214", 20000, 10);
        item.allowed = Some(Decimal::new(12000, 2));
        item.paid = Some(Decimal::new(9600, 2));
        item.patient_owes = Some(Decimal::new(2400, 2));

        let facts = FactSet {
            line_items: vec![item],
            ..Default::default()
        };
        assert!(BalanceBillingRule.evaluate(&facts).is_empty());
    }
}

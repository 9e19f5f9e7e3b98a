//! Unbundling: a comprehensive code billed together with one of its
//! components on the same date.

use crate::types::{categories, FactSet, Issue, Severity};

use super::BillingRule;

/// (comprehensive, component) pairs that should not be billed together.
const BUNDLED_PAIRS: &[(&str, &str)] = &[
    ("80053", "80048"), // comprehensive metabolic panel includes basic panel
    ("80053", "82947"), // ... and glucose
    ("80053", "82565"), // ... and creatinine
    ("85025", "85027"), // CBC with differential includes CBC without
    ("93000", "93005"), // ECG complete includes tracing only
    ("D4910", "D1110"), // periodontal maintenance replaces prophylaxis
];

/// Flags component codes billed alongside their comprehensive code.
pub struct UnbundledCodesRule {
    pairs: Vec<(String, String)>,
}

impl UnbundledCodesRule {
    pub fn new() -> Self {
        Self::with_pairs(BUNDLED_PAIRS.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect())
    }

    pub fn with_pairs(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }
}

impl Default for UnbundledCodesRule {
    fn default() -> Self {
        Self::new()
    }
}

impl BillingRule for UnbundledCodesRule {
    fn id(&self) -> &'static str {
        categories::UNBUNDLED_CODES
    }

    fn config_digest(&self) -> String {
        serde_json::to_string(&self.pairs).unwrap_or_default()
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<Issue> {
        let mut issues = Vec::new();

        for component in &facts.line_items {
            let Some(component_code) = component.code.as_deref() else {
                continue;
            };
            let bundled_into = self.pairs.iter().find(|(parent, child)| {
                child == component_code
                    && facts.line_items.iter().any(|other| {
                        other.code.as_deref() == Some(parent.as_str()) && other.date == component.date
                    })
            });

            if let Some((parent, _)) = bundled_into {
                issues.push(
                    Issue::deterministic(
                        categories::UNBUNDLED_CODES,
                        Severity::Medium,
                        format!("{} billed separately from {}", component_code, parent),
                        format!(
                            "Code {} is included in {} and should not be charged on its own.",
                            component_code, parent
                        ),
                        component.amount,
                    )
                    .with_affected_items(vec![parent.clone(), component_code.to_string()]),
                );
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::line;
    use rust_decimal::Decimal;

    #[test]
    fn test_component_with_parent_same_day() {
        let facts = FactSet {
            line_items: vec![line(1, "80053", 8550, 5), line(2, "80048", 4000, 5)],
            ..Default::default()
        };
        let issues = UnbundledCodesRule::new().evaluate(&facts);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].max_savings, Decimal::new(4000, 2));
        assert_eq!(issues[0].affected_items, vec!["80053", "80048"]);
    }

    #[test]
    fn test_component_on_other_day_is_fine() {
        let facts = FactSet {
            line_items: vec![line(1, "80053", 8550, 5), line(2, "80048", 4000, 6)],
            ..Default::default()
        };
        assert!(UnbundledCodesRule::new().evaluate(&facts).is_empty());
    }
}

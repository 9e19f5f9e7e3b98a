//! Deterministic rule engine.
//!
//! Each rule is an independent predicate over a [`FactSet`] that emits zero
//! or more issues. All rules run on every fact set with no short-circuiting,
//! and output order is rule-registration order followed by each rule's own
//! emission order.
//!
//! Rules never fail: a missing field just means the rule does not fire.

mod balance;
mod duplicate;
mod totals;
mod unbundling;

pub use balance::{BalanceBillingRule, PatientResponsibilityRule};
pub use duplicate::DuplicateChargeRule;
pub use totals::TotalMismatchRule;
pub use unbundling::UnbundledCodesRule;

use rust_decimal::Decimal;

use crate::types::{FactSet, Issue};

/// Amounts closer than this are treated as equal.
pub(crate) fn tolerance() -> Decimal {
    Decimal::new(1, 2)
}

/// A single deterministic billing check.
pub trait BillingRule: Send + Sync {
    /// Stable identifier, part of the rule-set fingerprint.
    fn id(&self) -> &'static str;

    /// Evaluate the rule. Must be pure.
    fn evaluate(&self, facts: &FactSet) -> Vec<Issue>;

    /// Canonical form of any configuration that changes this rule's output.
    /// Empty for rules with no configuration.
    fn config_digest(&self) -> String {
        String::new()
    }
}

/// Ordered collection of rules.
pub struct RuleEngine {
    rules: Vec<Box<dyn BillingRule>>,
}

impl RuleEngine {
    /// An engine with no rules.
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// The built-in rule set, in its fixed order.
    pub fn with_defaults() -> Self {
        let mut engine = Self::new();
        engine.register(Box::new(DuplicateChargeRule));
        engine.register(Box::new(TotalMismatchRule));
        engine.register(Box::new(PatientResponsibilityRule));
        engine.register(Box::new(BalanceBillingRule));
        engine.register(Box::new(UnbundledCodesRule::new()));
        engine
    }

    /// Append a rule. It runs after every rule already registered.
    pub fn register(&mut self, rule: Box<dyn BillingRule>) {
        self.rules.push(rule);
    }

    /// Rule identifiers in evaluation order.
    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    /// Identifies this rule set, including rule configuration, for replay hashing.
    pub fn fingerprint(&self) -> String {
        self.rules
            .iter()
            .map(|rule| {
                let digest = rule.config_digest();
                if digest.is_empty() {
                    rule.id().to_string()
                } else {
                    format!("{}{}", rule.id(), digest)
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Run every rule and concatenate their issues in registration order.
    pub fn evaluate(&self, facts: &FactSet) -> Vec<Issue> {
        let mut issues = Vec::new();
        for rule in &self.rules {
            let fired = rule.evaluate(facts);
            if !fired.is_empty() {
                tracing::debug!(rule = rule.id(), count = fired.len(), "Rule fired");
            }
            issues.extend(fired);
        }
        issues
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("rules", &self.rule_ids())
            .finish()
    }
}

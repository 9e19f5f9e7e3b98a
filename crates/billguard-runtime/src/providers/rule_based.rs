//! Zero-dependency fallback provider.
//!
//! Looks for fee and network language in the raw text. It never calls out
//! of process, so it is always available and is the default when nothing
//! else is configured.

use std::sync::Arc;

use async_trait::async_trait;
use billguard_core::extraction::parse_money;
use billguard_core::{categories, AnalysisResult, Confidence, FactSet, Issue, Severity};
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};

use super::{factory::ProviderFactory, AnalysisProvider, ProviderError};

/// Registry key of the built-in rule-based provider.
pub const RULE_BASED_KEY: &str = "rule_based";

lazy_static! {
    static ref FACILITY_FEE: Regex = Regex::new(
        r"(?im)^[^\n]*\bfacility\s+(?:fee|charge)\b[^\n]*?\$?([\d,]+\.\d{2})[ \t]*$"
    ).unwrap();

    static ref LATE_FEE: Regex = Regex::new(
        r"(?im)^[^\n]*\b(?:late\s+(?:payment\s+)?(?:fee|charge)|finance\s+charge)\b[^\n]*?\$?([\d,]+\.\d{2})[ \t]*$"
    ).unwrap();

    static ref OUT_OF_NETWORK: Regex = Regex::new(r"(?i)\bout[- ]of[- ]network\b").unwrap();

    static ref EMERGENCY: Regex = Regex::new(r"(?i)\b(?:emergency|ER visit|ambulance)\b").unwrap();

    static ref AMOUNT_DUE: Regex = Regex::new(
        r"(?i)(?:amount|balance)\s+due[ \t]*:?[ \t]*\$?([\d,]+\.\d{2})"
    ).unwrap();
}

/// Keyword-heuristic provider.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedProvider {
    key: String,
}

impl RuleBasedProvider {
    pub fn new() -> Self {
        Self::named(RULE_BASED_KEY)
    }

    pub fn named(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    fn fee_issues(pattern: &Regex, text: &str, build: impl Fn(Decimal) -> Issue) -> Vec<Issue> {
        pattern
            .captures_iter(text)
            .filter_map(|caps| parse_money(&caps[1]))
            .map(build)
            .collect()
    }

    fn detect(text: &str) -> Vec<Issue> {
        let mut issues = Self::fee_issues(&FACILITY_FEE, text, |amount| {
            Issue::from_provider(
                categories::FACILITY_FEE,
                Severity::Medium,
                "Facility fee charged",
                "Facility fees are often negotiable or not owed for clinic visits billed as hospital outpatient care. Ask for an itemized justification.",
                amount,
            )
            .with_confidence(Some(Confidence::Medium))
        });

        issues.extend(Self::fee_issues(&LATE_FEE, text, |amount| {
            Issue::from_provider(
                categories::LATE_FEE,
                Severity::Low,
                "Late fee or finance charge",
                "Late fees are frequently waived on request, especially while a claim is still being processed by insurance.",
                amount,
            )
            .with_confidence(Some(Confidence::Medium))
        }));

        if OUT_OF_NETWORK.is_match(text) && EMERGENCY.is_match(text) {
            let due = AMOUNT_DUE
                .captures(text)
                .and_then(|caps| parse_money(&caps[1]))
                .unwrap_or(Decimal::ZERO);
            issues.push(
                Issue::from_provider(
                    categories::SURPRISE_BILLING,
                    Severity::High,
                    "Possible surprise bill for out-of-network emergency care",
                    "Emergency care from out-of-network providers is generally billed at in-network cost sharing under the No Surprises Act.",
                    due,
                )
                .with_confidence(Some(Confidence::Low)),
            );
        }

        issues
    }
}

#[async_trait]
impl AnalysisProvider for RuleBasedProvider {
    async fn analyze(
        &self,
        raw_text: &str,
        _facts: Option<&FactSet>,
    ) -> Result<AnalysisResult, ProviderError> {
        Ok(AnalysisResult::new(&self.key)
            .with_issues(Self::detect(raw_text))
            .with_meta("model", json!("keyword-heuristics")))
    }

    fn name(&self) -> &str {
        &self.key
    }

    fn accepts_facts(&self) -> bool {
        false
    }
}

/// Builds rule-based providers. Takes no configuration.
pub struct RuleBasedFactory;

impl ProviderFactory for RuleBasedFactory {
    fn provider_type(&self) -> &'static str {
        RULE_BASED_KEY
    }

    fn create(&self, key: &str, _config: &JsonValue) -> Result<Arc<dyn AnalysisProvider>, ProviderError> {
        Ok(Arc::new(RuleBasedProvider::named(key)))
    }

    fn validate_config(&self, _config: &JsonValue) -> Result<(), ProviderError> {
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Offline keyword heuristics; always available"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detects_fees() {
        let text = "Office visit  $150.00\nFacility Fee  $250.00\nLate payment fee  $35.00\n";
        let result = RuleBasedProvider::new().analyze(text, None).await.unwrap();

        let cats: Vec<&str> = result.issues.iter().map(|i| i.category.as_str()).collect();
        assert_eq!(cats, vec!["facility_fee", "late_fee"]);
        assert_eq!(result.issues[0].max_savings, Decimal::new(25000, 2));
        assert_eq!(result.issues[1].max_savings, Decimal::new(3500, 2));
        assert_eq!(result.provider(), Some("rule_based"));
    }

    #[tokio::test]
    async fn test_surprise_billing() {
        let text = "Emergency department visit\nProvider status: Out-of-Network\nAmount Due: $1,200.00";
        let result = RuleBasedProvider::new().analyze(text, None).await.unwrap();
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].category.as_str(), "surprise_billing");
        assert_eq!(result.issues[0].max_savings, Decimal::new(120000, 2));
    }

    #[tokio::test]
    async fn test_clean_bill_has_no_issues() {
        let result = RuleBasedProvider::new()
            .analyze("Office visit  $150.00\nAmount Due: $30.00", None)
            .await
            .unwrap();
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_does_not_accept_facts() {
        assert!(!RuleBasedProvider::new().accepts_facts());
    }
}

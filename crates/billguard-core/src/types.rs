//! Core types for billing-document analysis.
//!
//! These are value types shared by every layer: the classifier, the rule
//! engine, providers, the pipeline, and the benchmark scorer.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The kinds of billing document the system knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// Itemized hospital or physician bill (CPT/HCPCS codes)
    MedicalBill,
    /// Dental office bill (CDT codes)
    DentalBill,
    /// Pharmacy receipt (Rx numbers, NDC codes)
    PharmacyReceipt,
    /// Insurer-issued Explanation of Benefits
    Eob,
    /// Anything the classifier could not place
    Generic,
}

impl DocumentType {
    /// All document types, in classifier priority order.
    pub fn all() -> [DocumentType; 5] {
        [
            DocumentType::Eob,
            DocumentType::DentalBill,
            DocumentType::PharmacyReceipt,
            DocumentType::MedicalBill,
            DocumentType::Generic,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::MedicalBill => "medical_bill",
            DocumentType::DentalBill => "dental_bill",
            DocumentType::PharmacyReceipt => "pharmacy_receipt",
            DocumentType::Eob => "eob",
            DocumentType::Generic => "generic",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentType::all()
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown document type: '{}'", s))
    }
}

/// Well-known issue categories emitted by the built-in rules and providers.
///
/// Categories are opaque tags; any string is a valid category.
pub mod categories {
    pub const DUPLICATE_CHARGE: &str = "duplicate_charge";
    pub const TOTAL_MISMATCH: &str = "total_mismatch";
    pub const PATIENT_RESPONSIBILITY_EXCEEDED: &str = "patient_responsibility_exceeded";
    pub const BALANCE_BILLING: &str = "balance_billing";
    pub const UNBUNDLED_CODES: &str = "unbundled_codes";
    pub const FACILITY_FEE: &str = "facility_fee";
    pub const LATE_FEE: &str = "late_fee";
    pub const SURPRISE_BILLING: &str = "surprise_billing";
}

/// Category tag of an issue. The sole key used for benchmark matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueCategory(String);

impl IssueCategory {
    pub fn new(category: impl Into<String>) -> Self {
        Self(category.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IssueCategory {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// How serious an issue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

/// How sure the detector is about an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Which channel produced an issue.
///
/// `Llm` covers everything returned by a provider, including the
/// rule-based fallback provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSource {
    Llm,
    Deterministic,
}

/// A billing problem found in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub title: String,
    #[serde(default)]
    pub explanation: String,
    /// Upper bound on what the patient could recover; never negative
    #[serde(default)]
    pub max_savings: Decimal,
    #[serde(default)]
    pub confidence: Option<Confidence>,
    pub source: IssueSource,
    #[serde(default)]
    pub affected_items: Vec<String>,
}

impl Issue {
    /// Create an issue produced by the deterministic rule engine.
    pub fn deterministic(
        category: impl Into<IssueCategory>,
        severity: Severity,
        title: impl Into<String>,
        explanation: impl Into<String>,
        max_savings: Decimal,
    ) -> Self {
        Self {
            category: category.into(),
            severity,
            title: title.into(),
            explanation: explanation.into(),
            max_savings: max_savings.max(Decimal::ZERO),
            confidence: Some(Confidence::High),
            source: IssueSource::Deterministic,
            affected_items: Vec::new(),
        }
    }

    /// Create an issue reported by a provider.
    pub fn from_provider(
        category: impl Into<IssueCategory>,
        severity: Severity,
        title: impl Into<String>,
        explanation: impl Into<String>,
        max_savings: Decimal,
    ) -> Self {
        Self {
            source: IssueSource::Llm,
            confidence: None,
            ..Self::deterministic(category, severity, title, explanation, max_savings)
        }
    }

    pub fn with_confidence(mut self, confidence: Option<Confidence>) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_affected_items(mut self, items: Vec<String>) -> Self {
        self.affected_items = items;
        self
    }
}

impl From<String> for IssueCategory {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One billed line on a bill, receipt, or EOB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// 1-based line number within the source document
    pub line_number: usize,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    /// CPT, CDT, HCPCS, NDC or Rx number, treated as opaque
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Billed amount
    pub amount: Decimal,
    #[serde(default)]
    pub allowed: Option<Decimal>,
    #[serde(default)]
    pub paid: Option<Decimal>,
    #[serde(default)]
    pub patient_owes: Option<Decimal>,
}

/// Structured facts extracted from one document.
///
/// A missing field is `None` or empty, never an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactSet {
    pub provider_name: Option<String>,
    pub patient_name: Option<String>,
    pub account_number: Option<String>,
    pub service_date: Option<NaiveDate>,
    pub total_charge: Option<Decimal>,
    pub insurance_paid: Option<Decimal>,
    pub patient_responsibility: Option<Decimal>,
    pub amount_due: Option<Decimal>,
    pub procedure_codes: Vec<String>,
    pub diagnosis_codes: Vec<String>,
    pub line_items: Vec<LineItem>,
}

impl FactSet {
    /// True when nothing at all was extracted.
    pub fn is_empty(&self) -> bool {
        *self == FactSet::default()
    }

    /// Sum of billed line-item amounts.
    ///
    /// `None` when there are no line items or the sum does not fit in a `Decimal`.
    pub fn line_items_total(&self) -> Option<Decimal> {
        if self.line_items.is_empty() {
            return None;
        }
        self.line_items
            .iter()
            .try_fold(Decimal::ZERO, |acc, item| acc.checked_add(item.amount))
    }

    /// Return a new fact set enriched with parsed line items.
    ///
    /// Line-item codes are merged into `procedure_codes`, keeping first-seen order.
    pub fn with_line_items(mut self, items: Vec<LineItem>) -> Self {
        for code in items.iter().filter_map(|item| item.code.as_ref()) {
            if !self.procedure_codes.contains(code) {
                self.procedure_codes.push(code.clone());
            }
        }
        self.line_items.extend(items);
        self
    }
}

/// Output of a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub issues: Vec<Issue>,
    /// Always carries at least `provider`
    #[serde(default)]
    pub meta: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub raw_response: Option<String>,
}

impl AnalysisResult {
    /// Create an empty result tagged with the provider name.
    pub fn new(provider: &str) -> Self {
        let mut meta = BTreeMap::new();
        meta.insert("provider".to_string(), JsonValue::String(provider.to_string()));
        Self {
            issues: Vec::new(),
            meta,
            raw_response: None,
        }
    }

    pub fn with_issues(mut self, issues: Vec<Issue>) -> Self {
        self.issues = issues;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Name of the provider that produced this result.
    pub fn provider(&self) -> Option<&str> {
        self.meta.get("provider").and_then(|v| v.as_str())
    }

    /// Saturates at `Decimal::MAX`.
    pub fn total_savings(&self) -> Decimal {
        self.issues
            .iter()
            .fold(Decimal::ZERO, |acc, issue| acc.saturating_add(issue.max_savings))
    }
}

/// Savings totals broken out by issue source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavingsBreakdown {
    pub deterministic_savings: Decimal,
    pub llm_savings: Decimal,
    pub total_savings: Decimal,
}

impl SavingsBreakdown {
    pub fn from_issues(issues: &[Issue]) -> Self {
        let mut breakdown = Self::default();
        for issue in issues {
            match issue.source {
                IssueSource::Deterministic => {
                    breakdown.deterministic_savings =
                        breakdown.deterministic_savings.saturating_add(issue.max_savings)
                }
                IssueSource::Llm => {
                    breakdown.llm_savings = breakdown.llm_savings.saturating_add(issue.max_savings)
                }
            }
            breakdown.total_savings = breakdown.total_savings.saturating_add(issue.max_savings);
        }
        breakdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_type_round_trip_str() {
        for doc_type in DocumentType::all() {
            assert_eq!(doc_type.as_str().parse::<DocumentType>().unwrap(), doc_type);
        }
        assert!("invoice".parse::<DocumentType>().is_err());
    }

    #[test]
    fn test_negative_savings_clamped() {
        let issue = Issue::deterministic(
            categories::TOTAL_MISMATCH,
            Severity::Low,
            "t",
            "e",
            Decimal::new(-500, 2),
        );
        assert_eq!(issue.max_savings, Decimal::ZERO);
    }

    #[test]
    fn test_provider_issue_defaults() {
        let issue = Issue::from_provider("late_fee", Severity::Low, "Late fee", "", Decimal::ONE);
        assert_eq!(issue.source, IssueSource::Llm);
        assert_eq!(issue.confidence, None);
    }

    #[test]
    fn test_issue_deserializes_with_missing_optional_fields() {
        let json = r#"{
            "category": "duplicate_charge",
            "severity": "high",
            "title": "Duplicate",
            "max_savings": 150.0,
            "source": "llm"
        }"#;
        let issue: Issue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.category.as_str(), "duplicate_charge");
        assert_eq!(issue.max_savings, Decimal::new(150, 0));
        assert!(issue.affected_items.is_empty());
    }

    #[test]
    fn test_with_line_items_merges_codes_in_order() {
        let facts = FactSet {
            procedure_codes: vec!["99213".to_string()],
            ..Default::default()
        };
        let item = |n: usize, code: &str| LineItem {
            line_number: n,
            date: None,
            code: Some(code.to_string()),
            description: String::new(),
            amount: Decimal::TEN,
            allowed: None,
            paid: None,
            patient_owes: None,
        };
        let enriched = facts.with_line_items(vec![item(1, "80053"), item(2, "99213"), item(3, "80053")]);
        assert_eq!(enriched.procedure_codes, vec!["99213", "80053"]);
        assert_eq!(enriched.line_items.len(), 3);
        assert_eq!(enriched.line_items_total(), Some(Decimal::new(30, 0)));
    }

    #[test]
    fn test_savings_breakdown_by_source() {
        let issues = vec![
            Issue::from_provider("facility_fee", Severity::Medium, "a", "", Decimal::new(4000, 2)),
            Issue::deterministic("duplicate_charge", Severity::High, "b", "", Decimal::new(15000, 2)),
        ];
        let breakdown = SavingsBreakdown::from_issues(&issues);
        assert_eq!(breakdown.llm_savings, Decimal::new(40, 0));
        assert_eq!(breakdown.deterministic_savings, Decimal::new(150, 0));
        assert_eq!(breakdown.total_savings, Decimal::new(190, 0));
    }

    #[test]
    fn test_savings_totals_saturate() {
        let issues = vec![
            Issue::from_provider("facility_fee", Severity::Medium, "a", "", Decimal::MAX),
            Issue::deterministic("duplicate_charge", Severity::High, "b", "", Decimal::MAX),
        ];
        let breakdown = SavingsBreakdown::from_issues(&issues);
        assert_eq!(breakdown.total_savings, Decimal::MAX);
        assert_eq!(breakdown.llm_savings, Decimal::MAX);

        let result = AnalysisResult::new("test").with_issues(issues);
        assert_eq!(result.total_savings(), Decimal::MAX);
    }

    #[test]
    fn test_line_items_total_overflow_is_none() {
        let item = LineItem {
            line_number: 1,
            date: None,
            code: None,
            description: String::new(),
            amount: Decimal::MAX,
            allowed: None,
            paid: None,
            patient_owes: None,
        };
        let facts = FactSet::default().with_line_items(vec![item.clone(), item]);
        assert_eq!(facts.line_items_total(), None);
    }

    #[test]
    fn test_analysis_result_carries_provider() {
        let result = AnalysisResult::new("rule_based");
        assert_eq!(result.provider(), Some("rule_based"));
        assert_eq!(result.total_savings(), Decimal::ZERO);
    }
}

//! # billguard-core
//!
//! Deterministic analysis of healthcare billing documents.
//!
//! This crate holds everything that does not need a model or a network:
//! - classifying a document (medical bill, dental bill, pharmacy receipt, EOB)
//! - extracting header facts and line items with patterns
//! - running the rule engine over extracted facts
//! - scoring detected issues against ground truth
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: same text in, same classification, facts and issues out
//! 2. **No I/O**: no network, no filesystem, no clocks
//! 3. **Never fails on missing data**: absent fields mean a rule does not fire
//!
//! ## Example
//!
//! ```rust,ignore
//! use billguard_core::analyze_deterministic;
//!
//! let analysis = analyze_deterministic(&std::fs::read_to_string("bill.txt")?);
//! for issue in &analysis.issues {
//!     println!("{}: save up to ${}", issue.title, issue.max_savings);
//! }
//! ```

pub mod benchmark;
pub mod classifier;
pub mod extraction;
pub mod line_items;
pub mod rules;
pub mod types;

pub use benchmark::{
    match_issues, savings_accuracy, BenchmarkCase, CaseMatch, CategoryMetrics, ExpectedIssue,
    MatchCounts, MetricsAccumulator, SavingsAccuracy,
};
pub use classifier::{Classification, DocumentClassifier};
pub use extraction::{extract_facts, ExtractionError};
pub use line_items::{parser_for, ClaimLineItemParser, CodedLineItemParser, LineItemParser};
pub use rules::{BillingRule, RuleEngine};
pub use types::{
    categories, AnalysisResult, Confidence, DocumentType, FactSet, Issue, IssueCategory,
    IssueSource, LineItem, SavingsBreakdown, Severity,
};

use serde::{Deserialize, Serialize};

/// Result of running only the deterministic half of the analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeterministicAnalysis {
    pub classification: Classification,
    pub facts: FactSet,
    pub issues: Vec<Issue>,
    pub savings: SavingsBreakdown,
}

/// Classify, extract, parse line items and evaluate the default rules.
///
/// Extraction failure degrades to an empty fact set.
pub fn analyze_deterministic(text: &str) -> DeterministicAnalysis {
    let classification = DocumentClassifier::new().classify(text);
    let doc_type = classification.document_type;

    let mut facts = extract_facts(text, doc_type).unwrap_or_default();
    if let Some(parser) = parser_for(doc_type) {
        let items = parser.parse(text, &facts);
        facts = facts.with_line_items(items);
    }

    let issues = RuleEngine::with_defaults().evaluate(&facts);
    let savings = SavingsBreakdown::from_issues(&issues);

    DeterministicAnalysis {
        classification,
        facts,
        issues,
        savings,
    }
}

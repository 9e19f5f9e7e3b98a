//! Document classifier.
//!
//! Each known document type owns a set of trigger patterns. The classifier
//! counts how many of a type's patterns fire and picks the type with the
//! highest count. Ties go to the type registered first, and a document with
//! no matches at all falls back to [`DocumentType::Generic`].

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::DocumentType;

lazy_static! {
    static ref EOB_PATTERNS: Vec<Regex> = compile(&[
        r"(?i)explanation\s+of\s+benefits",
        r"(?i)this\s+is\s+not\s+a\s+bill",
        r"(?i)\ballowed\s+amount\b",
        r"(?i)\bclaim\s*(?:number|#|no\.?)",
        r"(?i)\b(?:plan|insurance)\s+paid\b",
        r"(?i)\bmember\s+(?:id|name)\b",
    ]);

    static ref DENTAL_PATTERNS: Vec<Regex> = compile(&[
        r"(?i)\bdental\b",
        r"\bD\d{4}\b",
        r"(?i)\b(?:dds|dmd)\b",
        r"(?i)\b(?:tooth|teeth)\b",
        r"(?i)\b(?:periodontal|prophylaxis|orthodontic|endodontic)",
    ]);

    static ref PHARMACY_PATTERNS: Vec<Regex> = compile(&[
        r"(?i)\bpharmacy\b",
        r"(?i)\brx\s*(?:#|number|no\.?)",
        r"(?i)\bndc\b",
        r"(?i)\b(?:qty|quantity)\b",
        r"(?i)\brefills?\b",
        r"(?i)\bprescri(?:ption|ber)\b",
    ]);

    static ref MEDICAL_PATTERNS: Vec<Regex> = compile(&[
        r"(?i)\bcpt\b",
        r"(?i)\bstatement\s+date\b",
        r"(?i)\b(?:amount|balance)\s+due\b",
        r"(?i)\bpatient\s+(?:account|responsibility)\b",
        r"(?i)\b(?:hospital|clinic|medical\s+center|physician)\b",
        r"(?i)\bdate\s+of\s+service\b",
    ]);
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
}

/// Result of classifying a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub document_type: DocumentType,
    /// Winner's share of all pattern hits, 0-100; 0 for the fallback type
    pub confidence: u32,
    /// Pattern hits per document type
    pub scores: BTreeMap<String, u32>,
}

impl Classification {
    /// True when no pattern matched and the fallback type was chosen.
    pub fn is_fallback(&self) -> bool {
        self.confidence == 0
    }
}

/// Pattern-counting document classifier.
pub struct DocumentClassifier {
    /// Document types with their patterns, in tie-break priority order
    types: Vec<(DocumentType, Vec<Regex>)>,
    fallback: DocumentType,
}

impl DocumentClassifier {
    /// A classifier with no registered types; everything is the fallback.
    pub fn empty(fallback: DocumentType) -> Self {
        Self {
            types: Vec::new(),
            fallback,
        }
    }

    /// A classifier with the built-in patterns for bills, receipts and EOBs.
    pub fn new() -> Self {
        let mut classifier = Self::empty(DocumentType::Generic);
        classifier.types.push((DocumentType::Eob, EOB_PATTERNS.clone()));
        classifier.types.push((DocumentType::DentalBill, DENTAL_PATTERNS.clone()));
        classifier.types.push((DocumentType::PharmacyReceipt, PHARMACY_PATTERNS.clone()));
        classifier.types.push((DocumentType::MedicalBill, MEDICAL_PATTERNS.clone()));
        classifier
    }

    /// Add trigger patterns for a document type.
    ///
    /// A type seen for the first time goes to the end of the priority order.
    pub fn register(&mut self, doc_type: DocumentType, patterns: &[&str]) -> Result<(), regex::Error> {
        let compiled = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        match self.types.iter_mut().find(|(t, _)| *t == doc_type) {
            Some((_, existing)) => existing.extend(compiled),
            None => self.types.push((doc_type, compiled)),
        }
        Ok(())
    }

    /// Classify a document. Never fails.
    pub fn classify(&self, text: &str) -> Classification {
        let mut scores = BTreeMap::new();
        let mut best: Option<(DocumentType, u32)> = None;
        let mut total = 0u32;

        for (doc_type, patterns) in &self.types {
            let hits = patterns.iter().filter(|p| p.is_match(text)).count() as u32;
            scores.insert(doc_type.as_str().to_string(), hits);
            total += hits;

            // Strictly greater keeps the earlier-registered type on ties
            if hits > 0 && best.map_or(true, |(_, top)| hits > top) {
                best = Some((*doc_type, hits));
            }
        }

        match best {
            Some((document_type, hits)) => {
                let confidence = ((hits as f64 / total as f64) * 100.0).round() as u32;
                tracing::debug!(document_type = %document_type, confidence, "Document classified");
                Classification {
                    document_type,
                    confidence,
                    scores,
                }
            }
            None => {
                tracing::debug!(fallback = %self.fallback, "No classifier pattern matched");
                Classification {
                    document_type: self.fallback,
                    confidence: 0,
                    scores,
                }
            }
        }
    }
}

impl Default for DocumentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_classifies_eob() {
        let text = "EXPLANATION OF BENEFITS\nThis is not a bill.\nClaim Number: 12345\nAllowed Amount  Plan Paid";
        let result = DocumentClassifier::new().classify(text);
        assert_eq!(result.document_type, DocumentType::Eob);
        assert!(result.confidence > 50);
    }

    #[test]
    fn test_classifies_dental_bill() {
        let text = "Smile Dental Group, DDS\nD0120 Periodic oral evaluation\nD1110 Prophylaxis - adult";
        let result = DocumentClassifier::new().classify(text);
        assert_eq!(result.document_type, DocumentType::DentalBill);
    }

    #[test]
    fn test_classifies_pharmacy_receipt() {
        let text = "CornerCare Pharmacy\nRx #: 6612345\nNDC 0093-7146-56\nQty: 30  Refills: 2";
        let result = DocumentClassifier::new().classify(text);
        assert_eq!(result.document_type, DocumentType::PharmacyReceipt);
    }

    #[test]
    fn test_classifies_medical_bill() {
        let text = "Mercy Hospital\nStatement Date: 03/01/2024\nDate of Service  CPT  Description\nAmount Due: $300.00";
        let result = DocumentClassifier::new().classify(text);
        assert_eq!(result.document_type, DocumentType::MedicalBill);
    }

    #[test]
    fn test_no_matches_falls_back_to_generic() {
        let result = DocumentClassifier::new().classify("grocery list: eggs, milk");
        assert_eq!(result.document_type, DocumentType::Generic);
        assert_eq!(result.confidence, 0);
        assert!(result.is_fallback());
        assert!(result.scores.values().all(|s| *s == 0));
    }

    #[test]
    fn test_tie_goes_to_first_registered() {
        let mut classifier = DocumentClassifier::empty(DocumentType::Generic);
        classifier.register(DocumentType::MedicalBill, &["(?i)invoice"]).unwrap();
        classifier.register(DocumentType::DentalBill, &["(?i)invoice"]).unwrap();

        let result = classifier.classify("INVOICE");
        assert_eq!(result.document_type, DocumentType::MedicalBill);
        assert_eq!(result.confidence, 50);
    }

    #[test]
    fn test_register_extends_existing_type() {
        let mut classifier = DocumentClassifier::empty(DocumentType::Generic);
        classifier.register(DocumentType::Eob, &["alpha"]).unwrap();
        classifier.register(DocumentType::Eob, &["beta"]).unwrap();
        let result = classifier.classify("alpha beta");
        assert_eq!(result.scores["eob"], 2);
    }

    #[test]
    fn test_register_rejects_bad_pattern() {
        let mut classifier = DocumentClassifier::new();
        assert!(classifier.register(DocumentType::Eob, &["(unclosed"]).is_err());
    }

    proptest! {
        #[test]
        fn prop_classification_is_idempotent(text in "\\PC{0,200}") {
            let classifier = DocumentClassifier::new();
            let first = classifier.classify(&text);
            let second = classifier.classify(&text);
            prop_assert_eq!(first.document_type, second.document_type);
            prop_assert_eq!(first.confidence, second.confidence);
            prop_assert!(first.confidence <= 100);
        }
    }
}

//! Heuristic fact extraction.
//!
//! Pulls header-level facts (names, dates, totals, code lists) out of raw
//! document text with labelled-field patterns. Line items are handled
//! separately by [`crate::line_items`].

use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{DocumentType, FactSet};

/// Errors an extractor can report.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("Document is empty")]
    EmptyDocument,

    #[error("No extractor supports document type '{0}'")]
    Unsupported(DocumentType),

    #[error("Extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("Extraction failed: {0}")]
    Failed(String),
}

lazy_static! {
    static ref PROVIDER_NAME: Regex = Regex::new(
        r"(?im)^[ \t]*(?:billing provider|rendering provider|provider|facility|pharmacy|practice|dentist)(?:[ \t]+name)?[ \t]*:[ \t]*(.+?)[ \t]*$"
    ).unwrap();

    static ref PATIENT_NAME: Regex = Regex::new(
        r"(?im)^[ \t]*(?:patient|member)(?:[ \t]+name)?[ \t]*:[ \t]*(.+?)[ \t]*$"
    ).unwrap();

    static ref ACCOUNT_NUMBER: Regex = Regex::new(
        r"(?im)^[ \t]*(?:account|acct|claim)[ \t]*(?:#|no\.?|number)?[ \t]*:[ \t]*([A-Za-z0-9-]+)"
    ).unwrap();

    static ref SERVICE_DATE: Regex = Regex::new(
        r"(?im)(?:date of service|service date|dos)[ \t]*:[ \t]*(\d{1,2}/\d{1,2}/\d{2,4}|\d{4}-\d{2}-\d{2})"
    ).unwrap();

    static ref TOTAL_CHARGE: Regex = Regex::new(
        r"(?im)(?:total charges?|total billed|statement total)[ \t]*:?[ \t]*\$?[ \t]*([\d,]+\.\d{2})"
    ).unwrap();

    static ref INSURANCE_PAID: Regex = Regex::new(
        r"(?im)(?:insurance paid|plan paid|insurance payments?)[ \t]*:?[ \t]*-?\$?[ \t]*([\d,]+\.\d{2})"
    ).unwrap();

    static ref PATIENT_RESPONSIBILITY: Regex = Regex::new(
        r"(?im)(?:patient responsibility|your responsibility|you owe|patient owes)[ \t]*:?[ \t]*\$?[ \t]*([\d,]+\.\d{2})"
    ).unwrap();

    static ref AMOUNT_DUE: Regex = Regex::new(
        r"(?im)(?:amount due|balance due|please pay)[ \t]*:?[ \t]*\$?[ \t]*([\d,]+\.\d{2})"
    ).unwrap();

    static ref LABELLED_CPT: Regex = Regex::new(r"(?i)\bcpt[ \t]*:?[ \t]*(\d{4}[0-9A-Z])\b").unwrap();

    static ref CDT_CODE: Regex = Regex::new(r"\b(D\d{4})\b").unwrap();

    static ref DIAGNOSIS_LINE: Regex = Regex::new(
        r"(?im)^[ \t]*(?:diagnosis|diagnoses|icd-?10|dx)(?:[ \t]+codes?)?[ \t]*:(.*)$"
    ).unwrap();

    static ref ICD10_CODE: Regex = Regex::new(r"\b([A-TV-Z]\d{2}(?:\.[0-9A-Z]{1,4})?)\b").unwrap();
}

/// Parse a money amount such as `1,234.50`.
pub fn parse_money(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    Decimal::from_str(&cleaned).ok()
}

/// Parse a date in one of the formats bills commonly use.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    ["%m/%d/%y", "%m/%d/%Y", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw.trim(), fmt).ok())
}

fn capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn push_unique(codes: &mut Vec<String>, code: &str) {
    if !codes.iter().any(|c| c == code) {
        codes.push(code.to_string());
    }
}

/// Extract header facts from a document.
///
/// Fails only for blank input; any field that cannot be found is left empty.
pub fn extract_facts(text: &str, doc_type: DocumentType) -> Result<FactSet, ExtractionError> {
    if text.trim().is_empty() {
        return Err(ExtractionError::EmptyDocument);
    }

    let mut facts = FactSet {
        provider_name: capture(&PROVIDER_NAME, text),
        patient_name: capture(&PATIENT_NAME, text),
        account_number: capture(&ACCOUNT_NUMBER, text),
        service_date: capture(&SERVICE_DATE, text).and_then(|d| parse_date(&d)),
        total_charge: capture(&TOTAL_CHARGE, text).and_then(|m| parse_money(&m)),
        insurance_paid: capture(&INSURANCE_PAID, text).and_then(|m| parse_money(&m)),
        patient_responsibility: capture(&PATIENT_RESPONSIBILITY, text).and_then(|m| parse_money(&m)),
        amount_due: capture(&AMOUNT_DUE, text).and_then(|m| parse_money(&m)),
        ..Default::default()
    };

    for cap in LABELLED_CPT.captures_iter(text) {
        push_unique(&mut facts.procedure_codes, &cap[1]);
    }
    if doc_type == DocumentType::DentalBill {
        for cap in CDT_CODE.captures_iter(text) {
            push_unique(&mut facts.procedure_codes, &cap[1]);
        }
    }

    for line in DIAGNOSIS_LINE.captures_iter(text) {
        for cap in ICD10_CODE.captures_iter(&line[1]) {
            push_unique(&mut facts.diagnosis_codes, &cap[1]);
        }
    }

    Ok(facts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEDICAL_BILL: &str = "\
Mercy General Hospital
Provider: Mercy General Hospital
Patient Name: Jane Doe
Account #: A-10042
Date of Service: 03/14/2024
Diagnosis Codes: J06.9, R50.9
CPT: 99213
Total Charges: $1,250.00
Insurance Paid: $900.00
Patient Responsibility: $350.00
Amount Due: $350.00
";

    #[test]
    fn test_extracts_header_fields() {
        let facts = extract_facts(MEDICAL_BILL, DocumentType::MedicalBill).unwrap();
        assert_eq!(facts.provider_name.as_deref(), Some("Mercy General Hospital"));
        assert_eq!(facts.patient_name.as_deref(), Some("Jane Doe"));
        assert_eq!(facts.account_number.as_deref(), Some("A-10042"));
        assert_eq!(facts.service_date, NaiveDate::from_ymd_opt(2024, 3, 14));
        assert_eq!(facts.total_charge, Some(Decimal::new(125000, 2)));
        assert_eq!(facts.insurance_paid, Some(Decimal::new(90000, 2)));
        assert_eq!(facts.patient_responsibility, Some(Decimal::new(35000, 2)));
        assert_eq!(facts.amount_due, Some(Decimal::new(35000, 2)));
        assert_eq!(facts.procedure_codes, vec!["99213"]);
        assert_eq!(facts.diagnosis_codes, vec!["J06.9", "R50.9"]);
    }

    #[test]
    fn test_missing_fields_are_empty_not_errors() {
        let facts = extract_facts("just some words", DocumentType::Generic).unwrap();
        assert!(facts.is_empty());
    }

    #[test]
    fn test_empty_document_is_an_error() {
        assert_eq!(
            extract_facts("   \n", DocumentType::Generic),
            Err(ExtractionError::EmptyDocument)
        );
    }

    #[test]
    fn test_dental_codes_collected_for_dental_bills_only() {
        let text = "D0120 Periodic evaluation\nD1110 Prophylaxis";
        let dental = extract_facts(text, DocumentType::DentalBill).unwrap();
        assert_eq!(dental.procedure_codes, vec!["D0120", "D1110"]);

        let generic = extract_facts(text, DocumentType::Generic).unwrap();
        assert!(generic.procedure_codes.is_empty());
    }

    #[test]
    fn test_parse_money_and_dates() {
        assert_eq!(parse_money("$1,234.50"), Some(Decimal::new(123450, 2)));
        assert_eq!(parse_money("abc"), None);
        assert_eq!(parse_date("2024-01-05"), NaiveDate::from_ymd_opt(2024, 1, 5));
        assert_eq!(parse_date("1/5/24"), NaiveDate::from_ymd_opt(2024, 1, 5));
        assert_eq!(parse_date("Jan 5"), None);
    }
}

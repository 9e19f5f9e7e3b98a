//! Document-type-specific line-item parsers.
//!
//! Bills and receipts list coded line items (`date code description amount`);
//! EOBs list claim rows with billed/allowed/paid/owed columns. Generic
//! documents have no parser.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::extraction::{parse_date, parse_money};
use crate::types::{DocumentType, FactSet, LineItem};

lazy_static! {
    /// `03/14/2024  99213  Office visit  $150.00`, date optional
    static ref CODED_LINE: Regex = Regex::new(
        r"(?m)^[ \t]*(?:(?P<date>\d{1,2}/\d{1,2}/\d{2,4}|\d{4}-\d{2}-\d{2})[ \t]+)?(?P<code>D\d{4}|\d{4}[0-9A-Z]|[A-V]\d{4}|\d{4,5}-\d{3,4}-\d{1,2}|RX\d{5,})[ \t]+(?P<desc>.*?)[ \t]*\$?(?P<amount>-?[\d,]+\.\d{2})[ \t]*$"
    ).unwrap();

    /// `03/14/2024  99213  Office visit  $200.00  $120.00  $96.00  $24.00`
    static ref CLAIM_LINE: Regex = Regex::new(
        r"(?m)^[ \t]*(?P<date>\d{1,2}/\d{1,2}/\d{2,4}|\d{4}-\d{2}-\d{2})[ \t]+(?P<code>D\d{4}|\d{4}[0-9A-Z]|[A-V]\d{4})[ \t]+(?P<desc>.*?)[ \t]*\$?(?P<billed>[\d,]+\.\d{2})[ \t]+\$?(?P<allowed>[\d,]+\.\d{2})[ \t]+\$?(?P<paid>[\d,]+\.\d{2})[ \t]+\$?(?P<owes>[\d,]+\.\d{2})[ \t]*$"
    ).unwrap();
}

/// Parses line items for one family of documents.
pub trait LineItemParser: Send + Sync {
    /// Parser name, recorded in the workflow log.
    fn name(&self) -> &'static str;

    /// Parse line items from raw text.
    ///
    /// Header facts are available so parsers can default missing dates.
    fn parse(&self, text: &str, facts: &FactSet) -> Vec<LineItem>;
}

/// Parser for coded bill and receipt lines (CPT, CDT, HCPCS, NDC, Rx).
pub struct CodedLineItemParser;

/// Parser for EOB claim rows.
pub struct ClaimLineItemParser;

/// Select the parser for a document type, if it has one.
pub fn parser_for(doc_type: DocumentType) -> Option<Box<dyn LineItemParser>> {
    match doc_type {
        DocumentType::MedicalBill | DocumentType::DentalBill | DocumentType::PharmacyReceipt => {
            Some(Box::new(CodedLineItemParser))
        }
        DocumentType::Eob => Some(Box::new(ClaimLineItemParser)),
        DocumentType::Generic => None,
    }
}

fn line_number(text: &str, caps: &Captures<'_>) -> usize {
    let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
    text[..start].matches('\n').count() + 1
}

fn money(caps: &Captures<'_>, name: &str) -> Option<rust_decimal::Decimal> {
    caps.name(name).and_then(|m| parse_money(m.as_str()))
}

impl LineItemParser for CodedLineItemParser {
    fn name(&self) -> &'static str {
        "coded"
    }

    fn parse(&self, text: &str, facts: &FactSet) -> Vec<LineItem> {
        CODED_LINE
            .captures_iter(text)
            .filter_map(|caps| {
                let amount = money(&caps, "amount")?;
                let date = caps
                    .name("date")
                    .and_then(|m| parse_date(m.as_str()))
                    .or(facts.service_date);
                Some(LineItem {
                    line_number: line_number(text, &caps),
                    date,
                    code: caps.name("code").map(|m| m.as_str().to_string()),
                    description: caps
                        .name("desc")
                        .map(|m| m.as_str().trim().to_string())
                        .unwrap_or_default(),
                    amount,
                    allowed: None,
                    paid: None,
                    patient_owes: None,
                })
            })
            .collect()
    }
}

impl LineItemParser for ClaimLineItemParser {
    fn name(&self) -> &'static str {
        "claim"
    }

    fn parse(&self, text: &str, _facts: &FactSet) -> Vec<LineItem> {
        CLAIM_LINE
            .captures_iter(text)
            .filter_map(|caps| {
                Some(LineItem {
                    line_number: line_number(text, &caps),
                    date: caps.name("date").and_then(|m| parse_date(m.as_str())),
                    code: caps.name("code").map(|m| m.as_str().to_string()),
                    description: caps
                        .name("desc")
                        .map(|m| m.as_str().trim().to_string())
                        .unwrap_or_default(),
                    amount: money(&caps, "billed")?,
                    allowed: money(&caps, "allowed"),
                    paid: money(&caps, "paid"),
                    patient_owes: money(&caps, "owes"),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    #[test]
    fn test_coded_parser_reads_dated_lines() {
        let text = "Header\n03/14/2024  99213  Office visit, est. patient  $150.00\n03/14/2024  80053  Comprehensive metabolic panel  $85.50\nTotal Charges: $235.50";
        let items = CodedLineItemParser.parse(text, &FactSet::default());

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].line_number, 2);
        assert_eq!(items[0].code.as_deref(), Some("99213"));
        assert_eq!(items[0].description, "Office visit, est. patient");
        assert_eq!(items[0].amount, Decimal::new(15000, 2));
        assert_eq!(items[0].date, NaiveDate::from_ymd_opt(2024, 3, 14));
        assert_eq!(items[1].code.as_deref(), Some("80053"));
        assert_eq!(items[1].amount, Decimal::new(8550, 2));
    }

    #[test]
    fn test_coded_parser_defaults_date_to_service_date() {
        let facts = FactSet {
            service_date: NaiveDate::from_ymd_opt(2024, 2, 1),
            ..Default::default()
        };
        let items = CodedLineItemParser.parse("D1110  Prophylaxis - adult  $120.00", &facts);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].code.as_deref(), Some("D1110"));
        assert_eq!(items[0].date, facts.service_date);
    }

    #[test]
    fn test_claim_parser_reads_all_columns() {
        let text = "Date  Code  Service  Billed  Allowed  Paid  You Owe\n01/10/2024  99214  Office visit  $200.00  $120.00  $96.00  $24.00";
        let items = ClaimLineItemParser.parse(text, &FactSet::default());

        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.amount, Decimal::new(200, 0));
        assert_eq!(item.allowed, Some(Decimal::new(120, 0)));
        assert_eq!(item.paid, Some(Decimal::new(96, 0)));
        assert_eq!(item.patient_owes, Some(Decimal::new(24, 0)));
    }

    #[test]
    fn test_parser_selection() {
        assert_eq!(parser_for(DocumentType::MedicalBill).map(|p| p.name()), Some("coded"));
        assert_eq!(parser_for(DocumentType::PharmacyReceipt).map(|p| p.name()), Some("coded"));
        assert_eq!(parser_for(DocumentType::Eob).map(|p| p.name()), Some("claim"));
        assert!(parser_for(DocumentType::Generic).is_none());
    }
}

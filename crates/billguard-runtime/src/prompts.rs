//! Prompts for LLM-backed providers.
//!
//! The system prompt is identical for every document so backends that
//! support prompt caching (Anthropic) can cache it. Only the user turn
//! carries per-document content.

use billguard_core::FactSet;

/// Version tag for the prompts in this module, recorded with benchmark runs.
pub const PROMPT_VERSION: &str = "v1";

/// System prompt shared by every LLM provider.
pub const SYSTEM_PROMPT: &str = r#"
You are a medical billing auditor reviewing a patient's billing document
(itemized bill, dental bill, pharmacy receipt, or insurer Explanation of Benefits).

Your job is to find billing errors the patient could dispute, and estimate how
much money is at stake for each one.

## Rules
1. Report ONLY problems supported by the document text
2. Do not invent charges, codes, or amounts
3. If nothing looks wrong, return an empty issue list
4. `max_savings` is the most the patient could recover for that issue, in dollars, never negative
5. Use one of these categories when it fits, otherwise a short snake_case tag:
   duplicate_charge, total_mismatch, patient_responsibility_exceeded, balance_billing,
   unbundled_codes, facility_fee, late_fee, surprise_billing, upcoding, non_covered_service

## Output Format (JSON only, no prose)
{
  "issues": [
    {
      "category": "duplicate_charge",
      "severity": "high" | "medium" | "low",
      "title": "short summary",
      "explanation": "what is wrong and what the patient should ask for",
      "max_savings": 150.00,
      "confidence": "high" | "medium" | "low",
      "affected_items": ["99213"]
    }
  ]
}
"#;

/// Render the user turn for one document.
///
/// Facts are appended as JSON when the provider accepts them.
pub fn render_user_prompt(raw_text: &str, facts: Option<&FactSet>) -> String {
    let mut prompt = format!("## Document\n\n{}\n", raw_text.trim());

    if let Some(facts) = facts.filter(|f| !f.is_empty()) {
        if let Ok(json) = serde_json::to_string_pretty(facts) {
            prompt.push_str("\n## Extracted facts (may be incomplete)\n\n");
            prompt.push_str(&json);
            prompt.push('\n');
        }
    }

    prompt.push_str("\nReturn the JSON object described in your instructions.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_prompt_without_facts() {
        let prompt = render_user_prompt("  Total Charges: $10.00  ", None);
        assert!(prompt.contains("Total Charges: $10.00"));
        assert!(!prompt.contains("Extracted facts"));
    }

    #[test]
    fn test_empty_facts_are_omitted() {
        let prompt = render_user_prompt("text", Some(&FactSet::default()));
        assert!(!prompt.contains("Extracted facts"));
    }

    #[test]
    fn test_facts_rendered_as_json() {
        let facts = FactSet {
            total_charge: Some(Decimal::new(1000, 2)),
            ..Default::default()
        };
        let prompt = render_user_prompt("text", Some(&facts));
        assert!(prompt.contains("Extracted facts"));
        assert!(prompt.contains("\"total_charge\""));
    }
}

//! LLM-backed analysis provider.
//!
//! Renders prompts, calls a [`ChatModel`], and turns the JSON reply into
//! [`Issue`]s. Rate-limited calls are retried with exponential backoff;
//! every other error is returned to the pipeline as-is.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use billguard_core::extraction::parse_money;
use billguard_core::{AnalysisResult, Confidence, FactSet, Issue, Severity};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use super::{AnalysisProvider, ChatMessage, ChatModel, CompletionConfig, ProviderError};
use crate::prompts::{render_user_prompt, SYSTEM_PROMPT};
use crate::resilience::LlmUsage;

/// Analysis provider on top of any chat backend.
pub struct LlmAnalysisProvider {
    key: String,
    model: Arc<dyn ChatModel>,
    completion: CompletionConfig,
    accepts_facts: bool,
    max_retries: usize,
}

impl LlmAnalysisProvider {
    pub fn new(key: impl Into<String>, model: Arc<dyn ChatModel>, completion: CompletionConfig) -> Self {
        Self {
            key: key.into(),
            model,
            completion,
            accepts_facts: true,
            max_retries: 3,
        }
    }

    pub fn with_accepts_facts(mut self, accepts_facts: bool) -> Self {
        self.accepts_facts = accepts_facts;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[async_trait]
impl AnalysisProvider for LlmAnalysisProvider {
    async fn analyze(
        &self,
        raw_text: &str,
        facts: Option<&FactSet>,
    ) -> Result<AnalysisResult, ProviderError> {
        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT.trim()),
            ChatMessage::user(render_user_prompt(raw_text, facts)),
        ];

        let (model, completion, messages) = (&self.model, &self.completion, &messages);
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(500))
            .with_max_times(self.max_retries);

        let response = (|| async move { model.complete(messages.clone(), completion).await })
            .retry(backoff)
            .when(|e| matches!(e, ProviderError::RateLimited { .. }))
            .notify(|e, delay| {
                tracing::warn!(provider = %self.key, error = %e, ?delay, "Rate limited, retrying");
            })
            .await?;

        let issues = parse_issues(&response.content)?;

        let mut usage = LlmUsage::default();
        usage.add(&response.usage, &response.model);

        Ok(AnalysisResult {
            raw_response: Some(response.content.clone()),
            ..AnalysisResult::new(&self.key)
                .with_issues(issues)
                .with_meta("model", json!(response.model))
                .with_meta("backend", json!(self.model.name()))
                .with_meta("prompt_tokens", json!(usage.prompt_tokens))
                .with_meta("completion_tokens", json!(usage.completion_tokens))
                .with_meta("estimated_cost_usd", json!(usage.estimated_cost))
        })
    }

    fn name(&self) -> &str {
        &self.key
    }

    fn accepts_facts(&self) -> bool {
        self.accepts_facts
    }
}

/// Issue as models actually write it: every field optional and loosely typed.
#[derive(Debug, Deserialize)]
struct RawIssue {
    #[serde(alias = "type")]
    category: String,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "description")]
    explanation: Option<String>,
    #[serde(default, alias = "potential_savings")]
    max_savings: Option<JsonValue>,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    affected_items: Vec<JsonValue>,
}

fn parse_level(raw: Option<&str>) -> Option<&'static str> {
    match raw?.trim().to_ascii_lowercase().as_str() {
        "high" | "critical" => Some("high"),
        "medium" | "moderate" => Some("medium"),
        "low" | "minor" => Some("low"),
        _ => None,
    }
}

fn parse_severity(raw: Option<&str>) -> Severity {
    match parse_level(raw) {
        Some("high") => Severity::High,
        Some("low") => Severity::Low,
        _ => Severity::Medium,
    }
}

fn parse_confidence(raw: Option<&str>) -> Option<Confidence> {
    match parse_level(raw)? {
        "high" => Some(Confidence::High),
        "medium" => Some(Confidence::Medium),
        _ => Some(Confidence::Low),
    }
}

fn parse_savings(raw: Option<&JsonValue>) -> Decimal {
    let amount = match raw {
        Some(JsonValue::Number(n)) => n
            .as_f64()
            .and_then(Decimal::from_f64)
            .or_else(|| Decimal::from_str(&n.to_string()).ok()),
        Some(JsonValue::String(s)) => parse_money(s),
        _ => None,
    };
    amount.map(|d| d.round_dp(2)).unwrap_or(Decimal::ZERO)
}

impl From<RawIssue> for Issue {
    fn from(raw: RawIssue) -> Self {
        let title = raw
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| raw.category.replace('_', " "));
        Issue::from_provider(
            raw.category.trim().to_ascii_lowercase(),
            parse_severity(raw.severity.as_deref()),
            title,
            raw.explanation.unwrap_or_default(),
            parse_savings(raw.max_savings.as_ref()),
        )
        .with_confidence(parse_confidence(raw.confidence.as_deref()))
        .with_affected_items(
            raw.affected_items
                .into_iter()
                .map(|v| match v {
                    JsonValue::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
        )
    }
}

/// Strip a surrounding Markdown code fence, if any.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a model reply into issues.
///
/// Accepts `{"issues": [...]}` or a bare array, optionally inside a
/// Markdown code fence. Entries without a category are dropped.
pub fn parse_issues(content: &str) -> Result<Vec<Issue>, ProviderError> {
    let body = strip_code_fence(content);
    let value: JsonValue =
        serde_json::from_str(body).map_err(|e| ProviderError::ParseError(e.to_string()))?;

    let entries = match value {
        JsonValue::Array(entries) => entries,
        JsonValue::Object(mut map) => match map.remove("issues") {
            Some(JsonValue::Array(entries)) => entries,
            Some(JsonValue::Null) | None => Vec::new(),
            Some(other) => {
                return Err(ProviderError::ParseError(format!(
                    "'issues' must be an array, got {}",
                    other
                )))
            }
        },
        other => {
            return Err(ProviderError::ParseError(format!(
                "expected a JSON object or array, got {}",
                other
            )))
        }
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<RawIssue>(entry) {
            Ok(raw) if !raw.category.trim().is_empty() => Some(Issue::from(raw)),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed issue from provider reply");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionResponse, TokenUsage};
    use billguard_core::IssueSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedChat {
        replies: Vec<Result<String, ProviderError>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies[n.min(self.replies.len() - 1)].clone()?;
            Ok(CompletionResponse {
                content: reply,
                usage: TokenUsage {
                    prompt_tokens: 1000,
                    completion_tokens: 100,
                    ..Default::default()
                },
                model: "claude-sonnet-4-5".to_string(),
                stop_reason: Some("end_turn".to_string()),
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn provider(replies: Vec<Result<String, ProviderError>>) -> (Arc<ScriptedChat>, LlmAnalysisProvider) {
        let chat = Arc::new(ScriptedChat {
            replies,
            calls: AtomicUsize::new(0),
        });
        let provider = LlmAnalysisProvider::new("claude", chat.clone(), CompletionConfig::default());
        (chat, provider)
    }

    #[test]
    fn test_parse_object_in_code_fence() {
        let reply = "```json\n{\"issues\": [{\"category\": \"Duplicate_Charge\", \"severity\": \"HIGH\", \"title\": \"Dup\", \"max_savings\": 150, \"confidence\": \"medium\", \"affected_items\": [\"99213\", 2]}]}\n```";
        let issues = parse_issues(reply).unwrap();

        assert_eq!(issues.len(), 1);
        let issue = &issues[0];
        assert_eq!(issue.category.as_str(), "duplicate_charge");
        assert_eq!(issue.severity, Severity::High);
        assert_eq!(issue.max_savings, Decimal::new(150, 0));
        assert_eq!(issue.confidence, Some(Confidence::Medium));
        assert_eq!(issue.source, IssueSource::Llm);
        assert_eq!(issue.affected_items, vec!["99213", "2"]);
    }

    #[test]
    fn test_parse_bare_array_with_string_savings() {
        let reply = r#"[{"type": "late_fee", "description": "Late fee charged", "max_savings": "$25.00"}]"#;
        let issues = parse_issues(reply).unwrap();
        assert_eq!(issues[0].category.as_str(), "late_fee");
        assert_eq!(issues[0].title, "late fee");
        assert_eq!(issues[0].max_savings, Decimal::new(2500, 2));
        assert_eq!(issues[0].severity, Severity::Medium);
    }

    #[test]
    fn test_parse_empty_and_invalid() {
        assert!(parse_issues(r#"{"issues": []}"#).unwrap().is_empty());
        assert!(parse_issues("{}").unwrap().is_empty());
        assert!(matches!(parse_issues("I found no issues."), Err(ProviderError::ParseError(_))));
        assert!(parse_issues(r#"{"issues": "none"}"#).is_err());
    }

    #[test]
    fn test_negative_savings_clamped() {
        let issues = parse_issues(r#"[{"category": "x", "max_savings": -10}]"#).unwrap();
        assert_eq!(issues[0].max_savings, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_analyze_reports_usage_in_meta() {
        let (_, provider) = provider(vec![Ok(r#"{"issues": [{"category": "facility_fee"}]}"#.to_string())]);
        let result = provider.analyze("bill", None).await.unwrap();

        assert_eq!(result.provider(), Some("claude"));
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.meta["prompt_tokens"], 1000);
        assert!(result.meta["estimated_cost_usd"].as_f64().unwrap() > 0.0);
        assert!(result.raw_response.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried() {
        let (chat, provider) = provider(vec![
            Err(ProviderError::RateLimited { retry_after: None }),
            Ok("[]".to_string()),
        ]);
        let provider = provider.with_max_retries(2);

        let result = provider.analyze("bill", None).await.unwrap();
        assert!(result.issues.is_empty());
        assert_eq!(chat.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let (chat, provider) = provider(vec![Err(ProviderError::ApiError {
            status: 500,
            message: "boom".to_string(),
        })]);

        assert!(provider.analyze("bill", None).await.is_err());
        assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
    }
}

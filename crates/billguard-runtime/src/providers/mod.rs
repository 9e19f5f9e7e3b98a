//! Analysis providers.
//!
//! A provider turns raw document text (and, if it wants them, extracted
//! facts) into a list of issues. Cloud LLMs, self-hosted models and the
//! rule-based fallback all sit behind [`AnalysisProvider`], so the pipeline
//! never knows which backend it is talking to.
//!
//! LLM-backed providers are split in two: a [`ChatModel`] speaks one
//! vendor's chat-completion API, and [`LlmAnalysisProvider`] owns the
//! prompting and response parsing shared by every vendor.
//!
//! ## Security
//!
//! All chat backends use the [`secrets`] module for credential handling.

use async_trait::async_trait;
use billguard_core::{AnalysisResult, FactSet};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod anthropic;
mod factory;
mod llm;
mod openai;
mod registry;
mod rule_based;
pub mod secrets;

pub use anthropic::{AnthropicChat, AnthropicFactory, ANTHROPIC_API_KEY_ENV};
pub use factory::{build_registry, FactoryRegistry, ProviderFactory};
pub use llm::{parse_issues, LlmAnalysisProvider};
pub use openai::{OpenAiChat, OpenAiFactory, OPENAI_API_KEY_ENV};
pub use registry::{ProviderRegistry, ResolvedProvider};
pub use rule_based::{RuleBasedFactory, RuleBasedProvider, RULE_BASED_KEY};
pub use secrets::{ApiCredential, CredentialSource};

/// Errors from providers and chat backends.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Could not parse provider response: {0}")]
    ParseError(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Provider '{0}' is not available")]
    Unavailable(String),

    #[error("Circuit open for provider '{0}'")]
    CircuitOpen(String),

    #[error("Provider call cancelled")]
    Cancelled,
}

/// A backend that detects billing issues.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Analyze a document.
    ///
    /// `facts` is only passed when [`accepts_facts`](Self::accepts_facts)
    /// returns true.
    async fn analyze(
        &self,
        raw_text: &str,
        facts: Option<&FactSet>,
    ) -> Result<AnalysisResult, ProviderError>;

    /// Provider name, recorded in `meta.provider`.
    fn name(&self) -> &str;

    /// Whether this provider uses extracted facts as extra context.
    fn accepts_facts(&self) -> bool {
        true
    }
}

/// Configuration for a completion request.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Model to use
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature (0.0 for deterministic)
    pub temperature: f32,

    /// Request timeout
    pub timeout: Duration,

    /// Enable prompt caching (Anthropic-specific)
    pub prompt_caching: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250514".to_string(),
            max_tokens: 2048,
            temperature: 0.0,
            timeout: Duration::from_secs(60),
            prompt_caching: true,
        }
    }
}

impl CompletionConfig {
    /// Read overrides from a provider `config` block.
    pub fn from_json(config: &serde_json::Value, default_model: &str) -> Self {
        let defaults = Self::default();
        Self {
            model: config["model"].as_str().unwrap_or(default_model).to_string(),
            max_tokens: config["max_tokens"]
                .as_u64()
                .map(|v| v as u32)
                .unwrap_or(defaults.max_tokens),
            temperature: config["temperature"]
                .as_f64()
                .map(|v| v as f32)
                .unwrap_or(defaults.temperature),
            timeout: config["timeout_secs"]
                .as_u64()
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            prompt_caching: config["prompt_caching"]
                .as_bool()
                .unwrap_or(defaults.prompt_caching),
        }
    }
}

/// A chat message for LLM completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant"
    pub role: String,

    /// Message content
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Response from an LLM completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,

    /// Token usage
    pub usage: TokenUsage,

    /// Model used
    pub model: String,

    /// Stop reason
    pub stop_reason: Option<String>,
}

/// Token usage from a completion.
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,

    /// Tokens read from cache (Anthropic)
    pub cache_read_tokens: u32,

    /// Tokens written to cache (Anthropic)
    pub cache_creation_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// One vendor's chat-completion API.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Execute a chat completion.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Backend name, e.g. "anthropic".
    fn name(&self) -> &str;
}

//! Anthropic Messages API backend.
//!
//! The HTTP client is only compiled with the `anthropic` feature. Without
//! it, [`AnthropicChat::complete`] returns `NotConfigured`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{
    factory::ProviderFactory,
    llm::LlmAnalysisProvider,
    secrets::{ApiCredential, CredentialSource},
    AnalysisProvider, ChatMessage, ChatModel, CompletionConfig, CompletionResponse, ProviderError,
};

/// Environment variable name for the Anthropic API key.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250514";

/// Claude chat backend.
pub struct AnthropicChat {
    credential: ApiCredential,
    base_url: String,
    #[cfg(feature = "anthropic")]
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicChat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicChat")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AnthropicChat {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_credential(
            ApiCredential::new(api_key, CredentialSource::Programmatic, "Anthropic API key"),
            DEFAULT_BASE_URL,
        )
    }

    /// Build from a provider `config` block, falling back to `ANTHROPIC_API_KEY`.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            ANTHROPIC_API_KEY_ENV,
            "Anthropic API key",
        )?;
        let base_url = config["base_url"].as_str().unwrap_or(DEFAULT_BASE_URL);
        Ok(Self::with_credential(credential, base_url))
    }

    fn with_credential(credential: ApiCredential, base_url: &str) -> Self {
        Self {
            credential,
            base_url: base_url.trim_end_matches('/').to_string(),
            #[cfg(feature = "anthropic")]
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Vec<ContentBlock>>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    type_: String,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(not(feature = "anthropic"), allow(dead_code))]
struct AnthropicResponse {
    content: Vec<ContentBlockResponse>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(not(feature = "anthropic"), allow(dead_code))]
struct ContentBlockResponse {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(not(feature = "anthropic"), allow(dead_code))]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(not(feature = "anthropic"), allow(dead_code))]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(not(feature = "anthropic"), allow(dead_code))]
struct AnthropicErrorDetail {
    message: String,
}

/// Split out the system prompt and convert the rest to Messages API form.
fn build_request(messages: Vec<ChatMessage>, config: &CompletionConfig) -> AnthropicRequest {
    let cache_control = || {
        config.prompt_caching.then(|| CacheControl {
            type_: "ephemeral".to_string(),
        })
    };

    let mut system = None;
    let mut turns = Vec::new();
    for msg in messages {
        if msg.role == "system" {
            // The system prompt is identical across documents; cache it
            system = Some(vec![ContentBlock::Text {
                text: msg.content,
                cache_control: cache_control(),
            }]);
        } else {
            turns.push(AnthropicMessage {
                role: msg.role,
                content: vec![ContentBlock::Text {
                    text: msg.content,
                    cache_control: None,
                }],
            });
        }
    }

    AnthropicRequest {
        model: config.model.clone(),
        max_tokens: config.max_tokens,
        system,
        messages: turns,
        temperature: (config.temperature != 0.0).then_some(config.temperature),
    }
}

#[async_trait]
impl ChatModel for AnthropicChat {
    #[cfg(feature = "anthropic")]
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        use super::TokenUsage;
        use std::time::Duration;

        let request = build_request(messages, config);

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(config.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let message = response
                .json::<AnthropicError>()
                .await
                .map(|body| body.error.message)
                .unwrap_or_else(|e| e.to_string());
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let content = body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: body.usage.input_tokens,
                completion_tokens: body.usage.output_tokens,
                cache_read_tokens: body.usage.cache_read_input_tokens,
                cache_creation_tokens: body.usage.cache_creation_input_tokens,
            },
            model: body.model,
            stop_reason: body.stop_reason,
        })
    }

    #[cfg(not(feature = "anthropic"))]
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let _ = build_request(messages, config);
        Err(ProviderError::NotConfigured(
            "Anthropic backend requires the 'anthropic' feature".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// Builds Claude-backed analysis providers.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "sk-ant-...",
///   "base_url": "https://...",
///   "model": "claude-sonnet-4-5-20250514",
///   "max_tokens": 2048,
///   "prompt_caching": true,
///   "accepts_facts": true
/// }
/// ```
pub struct AnthropicFactory;

impl ProviderFactory for AnthropicFactory {
    fn provider_type(&self) -> &'static str {
        "anthropic"
    }

    fn create(&self, key: &str, config: &JsonValue) -> Result<Arc<dyn AnalysisProvider>, ProviderError> {
        self.validate_config(config)?;
        let chat = AnthropicChat::from_config(config)?;
        let completion = CompletionConfig::from_json(config, DEFAULT_MODEL);
        Ok(Arc::new(
            LlmAnalysisProvider::new(key, Arc::new(chat), completion)
                .with_accepts_facts(config["accepts_facts"].as_bool().unwrap_or(true)),
        ))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if let Some(url) = config["base_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({
            "model": DEFAULT_MODEL,
            "prompt_caching": true
        })
    }

    fn description(&self) -> &'static str {
        "Anthropic Claude via the Messages API"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_not_in_debug_output() {
        let secret_key = "sk-ant-REDACTED";
        let chat = AnthropicChat::new(secret_key);
        let debug_output = format!("{:?}", chat);
        assert!(!debug_output.contains(secret_key), "API key was exposed in Debug output!");
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_system_prompt_is_lifted_and_cached() {
        let request = build_request(
            vec![ChatMessage::system("rules"), ChatMessage::user("bill text")],
            &CompletionConfig::default(),
        );
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["system"][0]["text"], "rules");
        assert_eq!(json["system"][0]["cache_control"]["type"], "ephemeral");
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_factory_builds_named_provider() {
        let provider = AnthropicFactory
            .create("claude", &serde_json::json!({"api_key": "test-key"}))
            .unwrap();
        assert_eq!(provider.name(), "claude");
        assert!(provider.accepts_facts());
    }

    #[test]
    fn test_factory_rejects_bad_base_url() {
        let config = serde_json::json!({"api_key": "k", "base_url": "invalid-url"});
        assert!(AnthropicFactory.create("claude", &config).is_err());
    }

    #[test]
    fn test_from_config_tracks_source() {
        let config = serde_json::json!({
            "api_key": "config-api-key",
            "base_url": "https://custom.api.com/v1/"
        });
        let chat = AnthropicChat::from_config(&config).unwrap();
        assert_eq!(chat.base_url, "https://custom.api.com/v1");
        assert_eq!(chat.credential.source(), CredentialSource::Config);
    }
}

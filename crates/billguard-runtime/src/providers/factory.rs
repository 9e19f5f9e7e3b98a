//! Provider factories and registry construction from configuration.
//!
//! Each backend type registers a [`ProviderFactory`]; configured provider
//! entries name a type and carry its JSON config. Adding a backend means
//! adding a factory, not touching the pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{
    AnalysisProvider, AnthropicFactory, OpenAiFactory, ProviderError, ProviderRegistry,
    RuleBasedFactory, RuleBasedProvider, RULE_BASED_KEY,
};
use crate::config::RuntimeConfig;

/// Creates providers of one type from JSON configuration.
pub trait ProviderFactory: Send + Sync {
    /// Type identifier used in config, e.g. "anthropic".
    fn provider_type(&self) -> &'static str;

    /// Create a provider registered under `key`.
    fn create(&self, key: &str, config: &JsonValue) -> Result<Arc<dyn AnalysisProvider>, ProviderError>;

    /// Validate configuration without creating a provider.
    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError>;

    /// Defaults for optional fields.
    fn default_config(&self) -> JsonValue {
        serde_json::json!({})
    }

    fn description(&self) -> &'static str {
        "Analysis provider"
    }
}

/// Available provider factories, keyed by type.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any with the same type.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    /// Create a provider of `provider_type` under `key`.
    pub fn create(
        &self,
        provider_type: &str,
        key: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn AnalysisProvider>, ProviderError> {
        self.factories
            .get(provider_type)
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "Unknown provider type: '{}'. Available: {:?}",
                    provider_type,
                    self.available_types()
                ))
            })?
            .create(key, config)
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    pub fn default_config(&self, provider_type: &str) -> Option<JsonValue> {
        self.factories.get(provider_type).map(|f| f.default_config())
    }

    /// Rule-based, Anthropic and OpenAI-compatible factories.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RuleBasedFactory));
        registry.register(Arc::new(AnthropicFactory));
        registry.register(Arc::new(OpenAiFactory));
        registry
    }
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("types", &self.available_types())
            .finish()
    }
}

/// Build the provider registry for a process.
///
/// The rule-based provider is always registered. Configured entries that
/// fail to build (usually missing credentials) are skipped with a warning;
/// runs that ask for them later fall back to the default provider.
pub fn build_registry(config: &RuntimeConfig, factories: &FactoryRegistry) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(RULE_BASED_KEY, Arc::new(RuleBasedProvider::new()));

    for spec in &config.providers {
        match factories.create(&spec.provider_type, &spec.key, &spec.config) {
            Ok(provider) => {
                tracing::info!(provider = %spec.key, provider_type = %spec.provider_type, "Provider registered");
                registry.register(spec.key.clone(), provider);
            }
            Err(e) => {
                tracing::warn!(provider = %spec.key, error = %e, "Provider unavailable, skipping");
            }
        }
    }

    let default = config.default_provider.as_deref().unwrap_or(RULE_BASED_KEY);
    if registry.contains(default) {
        registry.set_default(default);
    } else {
        tracing::warn!(requested = default, "Default provider unavailable, using rule_based");
        registry.set_default(RULE_BASED_KEY);
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSpec;

    #[test]
    fn test_unknown_type() {
        let result = FactoryRegistry::with_defaults().create("bedrock", "x", &serde_json::json!({}));
        match result {
            Err(ProviderError::NotConfigured(msg)) => assert!(msg.contains("Unknown provider type")),
            _ => panic!("Expected NotConfigured error"),
        }
    }

    #[test]
    fn test_default_types() {
        assert_eq!(
            FactoryRegistry::with_defaults().available_types(),
            vec!["anthropic", "openai", "rule_based"]
        );
    }

    #[test]
    fn test_build_registry_skips_unavailable_providers() {
        let config = RuntimeConfig {
            default_provider: Some("claude".to_string()),
            providers: vec![
                ProviderSpec {
                    key: "claude".to_string(),
                    provider_type: "anthropic".to_string(),
                    config: serde_json::json!({"api_key": "test-key"}),
                },
                ProviderSpec {
                    key: "gpt".to_string(),
                    provider_type: "openai".to_string(),
                    // Blank key and no env var in tests
                    config: serde_json::json!({"api_key": ""}),
                },
                ProviderSpec {
                    key: "mystery".to_string(),
                    provider_type: "bedrock".to_string(),
                    config: serde_json::json!({}),
                },
            ],
            ..Default::default()
        };

        let registry = build_registry(&config, &FactoryRegistry::with_defaults());
        assert!(registry.contains("claude"));
        assert!(registry.contains("rule_based"));
        assert!(!registry.contains("mystery"));
        assert_eq!(registry.default_key(), Some("claude"));
    }

    #[test]
    fn test_missing_default_falls_back_to_rule_based() {
        let config = RuntimeConfig {
            default_provider: Some("nope".to_string()),
            ..Default::default()
        };
        let registry = build_registry(&config, &FactoryRegistry::with_defaults());
        assert_eq!(registry.default_key(), Some("rule_based"));
    }
}

//! Registry of named provider instances.
//!
//! Built once at startup and then shared read-only (`Arc<ProviderRegistry>`)
//! by the pipeline and evaluator, so lookups need no locking. Registering
//! a key twice replaces the earlier provider, which is how tests swap in
//! fakes.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{AnalysisProvider, ProviderError};

/// Outcome of resolving a provider for one run.
#[derive(Clone)]
pub struct ResolvedProvider {
    pub key: String,
    pub provider: Arc<dyn AnalysisProvider>,
    /// Requested key that was unavailable, when the default was used instead
    pub fallback_from: Option<String>,
}

impl std::fmt::Debug for ResolvedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedProvider")
            .field("key", &self.key)
            .field("fallback_from", &self.fallback_from)
            .finish()
    }
}

/// Provider instances keyed by provider key.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn AnalysisProvider>>,
    default_key: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Returns the provider it replaced, if any.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        provider: Arc<dyn AnalysisProvider>,
    ) -> Option<Arc<dyn AnalysisProvider>> {
        let key = key.into();
        let replaced = self.providers.insert(key.clone(), provider);
        if replaced.is_some() {
            tracing::debug!(provider = %key, "Provider registration replaced");
        }
        replaced
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn AnalysisProvider>> {
        self.providers.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.providers.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn list(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Set the key used when a run names no provider or an unavailable one.
    pub fn set_default(&mut self, key: impl Into<String>) {
        self.default_key = Some(key.into());
    }

    pub fn default_key(&self) -> Option<&str> {
        self.default_key.as_deref()
    }

    /// Pick the provider for a run: explicit key, else the configured default.
    ///
    /// An explicit key that is not registered falls back to the default.
    /// Fails only when neither is available.
    pub fn resolve(&self, requested: Option<&str>) -> Result<ResolvedProvider, ProviderError> {
        if let Some(key) = requested {
            if let Some(provider) = self.get(key) {
                return Ok(ResolvedProvider {
                    key: key.to_string(),
                    provider,
                    fallback_from: None,
                });
            }
        }

        let default = self
            .default_key
            .as_deref()
            .and_then(|key| self.get(key).map(|p| (key, p)));

        match default {
            Some((key, provider)) => {
                if let Some(requested) = requested {
                    tracing::warn!(requested, fallback = key, "Provider unavailable, using default");
                }
                Ok(ResolvedProvider {
                    key: key.to_string(),
                    provider,
                    fallback_from: requested.map(str::to_string),
                })
            }
            None => Err(ProviderError::Unavailable(
                requested
                    .or(self.default_key.as_deref())
                    .unwrap_or("<none>")
                    .to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.list())
            .field("default", &self.default_key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::RuleBasedProvider;

    fn provider(name: &str) -> Arc<dyn AnalysisProvider> {
        Arc::new(RuleBasedProvider::named(name))
    }

    #[test]
    fn test_register_get_list() {
        let mut registry = ProviderRegistry::new();
        assert!(registry.register("b", provider("b")).is_none());
        registry.register("a", provider("a"));

        assert_eq!(registry.list(), vec!["a", "b"]);
        assert_eq!(registry.get("a").map(|p| p.name().to_string()), Some("a".to_string()));
        assert!(registry.get("c").is_none());
    }

    #[test]
    fn test_last_writer_wins() {
        let mut registry = ProviderRegistry::new();
        registry.register("x", provider("first"));
        assert!(registry.register("x", provider("second")).is_some());

        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.get("x").unwrap().name(), "second");
    }

    #[test]
    fn test_resolve_prefers_explicit_key() {
        let mut registry = ProviderRegistry::new();
        registry.register("a", provider("a"));
        registry.register("b", provider("b"));
        registry.set_default("a");

        let resolved = registry.resolve(Some("b")).unwrap();
        assert_eq!(resolved.key, "b");
        assert!(resolved.fallback_from.is_none());

        assert_eq!(registry.resolve(None).unwrap().key, "a");
    }

    #[test]
    fn test_unknown_key_falls_back_to_default() {
        let mut registry = ProviderRegistry::new();
        registry.register("a", provider("a"));
        registry.set_default("a");

        let resolved = registry.resolve(Some("missing")).unwrap();
        assert_eq!(resolved.key, "a");
        assert_eq!(resolved.fallback_from.as_deref(), Some("missing"));
    }

    #[test]
    fn test_no_default_is_unavailable() {
        let mut registry = ProviderRegistry::new();
        registry.register("a", provider("a"));

        assert!(matches!(registry.resolve(Some("missing")), Err(ProviderError::Unavailable(k)) if k == "missing"));
        assert!(registry.resolve(None).is_err());
    }
}

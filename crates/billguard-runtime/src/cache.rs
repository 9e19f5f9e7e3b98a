//! Provider result cache.
//!
//! Keyed by a run's replay key, which already covers the input text, the
//! provider, the extractor configuration and the rule set. Repeated
//! benchmark runs over the same dataset skip identical provider calls.

use billguard_core::AnalysisResult;
use moka::future::Cache;
use std::time::Duration;

use crate::config::CacheConfig;

/// Cache of provider results.
#[derive(Clone)]
pub struct AnalysisCache {
    cache: Cache<String, AnalysisResult>,
}

impl AnalysisCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    /// Build from config; `None` when caching is disabled.
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.max_entries, config.ttl))
    }

    pub async fn get(&self, replay_key: &str) -> Option<AnalysisResult> {
        self.cache.get(replay_key).await
    }

    pub async fn insert(&self, replay_key: String, result: AnalysisResult) {
        self.cache.insert(replay_key, result).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
            .unwrap_or_else(|| Self::new(1_000, Duration::from_secs(3600)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_operations() {
        let cache = AnalysisCache::default();
        assert!(cache.get("abc").await.is_none());

        cache.insert("abc".to_string(), AnalysisResult::new("claude")).await;
        let cached = cache.get("abc").await.unwrap();
        assert_eq!(cached.provider(), Some("claude"));
    }

    #[test]
    fn test_disabled_cache() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(AnalysisCache::from_config(&config).is_none());
    }
}

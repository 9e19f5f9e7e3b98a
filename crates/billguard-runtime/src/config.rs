//! Runtime configuration.
//!
//! Loaded from YAML; every field has a default, so an empty file (or no
//! file) is a valid configuration that runs only the rule-based provider.
//!
//! ```yaml
//! default_provider: claude
//! provider_timeout: 45s
//! max_concurrency: 8
//! extractor_overrides:
//!   eob: heuristic
//! providers:
//!   - key: claude
//!     type: anthropic
//!     config:
//!       model: claude-sonnet-4-5-20250514
//!   - key: medgemma
//!     type: openai
//!     config:
//!       base_url: http://localhost:8000/v1
//!       api_key: none
//!       model: medgemma-27b
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use billguard_core::DocumentType;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::resilience::CircuitBreakerConfig;

/// Errors loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// One configured provider instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Registry key, e.g. "claude"
    pub key: String,
    /// Factory type, e.g. "anthropic"
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(default)]
    pub config: JsonValue,
}

/// Result cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: u64,
    #[serde(with = "humantime_duration")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Provider used when a run names none; "rule_based" if unset
    pub default_provider: Option<String>,

    #[serde(with = "humantime_duration")]
    pub provider_timeout: Duration,

    #[serde(with = "humantime_duration")]
    pub extractor_timeout: Duration,

    /// Benchmark cases in flight at once
    pub max_concurrency: usize,

    /// Relative savings error counted as accurate
    pub savings_tolerance: f64,

    /// Extractor key per document type; unlisted types use "heuristic"
    pub extractor_overrides: BTreeMap<DocumentType, String>,

    pub circuit_breaker: CircuitBreakerConfig,

    pub cache: CacheConfig,

    pub providers: Vec<ProviderSpec>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_provider: None,
            provider_timeout: Duration::from_secs(30),
            extractor_timeout: Duration::from_secs(10),
            max_concurrency: 4,
            savings_tolerance: billguard_core::benchmark::DEFAULT_SAVINGS_TOLERANCE,
            extractor_overrides: BTreeMap::new(),
            circuit_breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            providers: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }
}

/// Durations as humantime strings ("30s", "2m 30s").
mod humantime_duration {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(de::Error::custom)
    }
}

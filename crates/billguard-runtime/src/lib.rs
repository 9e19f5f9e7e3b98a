//! # billguard-runtime
//!
//! Async orchestration around `billguard-core`.
//!
//! This crate is where the network lives:
//! - analysis providers (cloud LLMs, OpenAI-compatible self-hosted models,
//!   and the rule-based fallback) behind one trait, looked up by key
//! - the five-stage analysis pipeline with its workflow log
//! - the benchmark evaluator that scores providers against ground truth
//!
//! Provider failures never abort a run. A provider that errors, times out,
//! or has an open circuit leaves a failed `analysis` stage in the log and
//! the deterministic issues still come back.
//!
//! ## Example
//!
//! ```rust,ignore
//! use billguard_runtime::{build_pipeline, RunOptions, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_file("billguard.yaml")?;
//! let pipeline = build_pipeline(&config)?;
//!
//! let output = pipeline.run(&text, RunOptions::new().with_provider("claude")).await;
//! println!("{} issues, ${} potential savings", output.issues().len(), output.savings.total_savings);
//! ```

pub mod benchmark;
pub mod cache;
pub mod config;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod resilience;

use std::sync::Arc;

pub use benchmark::{
    load_cases, AggregateMetrics, BenchmarkEvaluator, CaseResult, DatasetError, Subset,
};
pub use cache::AnalysisCache;
pub use config::{CacheConfig, ConfigError, ProviderSpec, RuntimeConfig};
pub use pipeline::{
    AnalysisPipeline, CancelHandle, CancelSignal, PipelineError, PipelineOutput, RunOptions,
    RunStatus, Stage, StageStatus, WorkflowLog,
};
pub use providers::{
    build_registry, AnalysisProvider, FactoryRegistry, ProviderError, ProviderRegistry,
};

/// Build the provider registry and pipeline described by `config`.
pub fn build_pipeline(config: &RuntimeConfig) -> Result<AnalysisPipeline, PipelineError> {
    let registry = build_registry(config, &FactoryRegistry::with_defaults());
    tracing::info!(providers = ?registry.list(), default = ?registry.default_key(), "Provider registry ready");

    AnalysisPipeline::builder(Arc::new(registry))
        .config(config)
        .build()
}

//! Benchmark evaluator.
//!
//! Runs every case through the pipeline with a fixed provider, matches the
//! detected issues against ground truth, and micro-averages the counts.
//! Cases run concurrently, bounded by a semaphore shared across providers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use billguard_core::{
    match_issues, savings_accuracy, BenchmarkCase, CaseMatch, CategoryMetrics, IssueCategory, MatchCounts,
    MetricsAccumulator, SavingsAccuracy,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::sync::Semaphore;

use crate::config::RuntimeConfig;
use crate::pipeline::{AnalysisPipeline, PipelineError, PipelineOutput, RunOptions, RunStatus};

/// Outcome of one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: String,
    pub status: RunStatus,
    pub latency_ms: u64,
    /// Categories the pipeline reported, in output order
    pub detected: Vec<IssueCategory>,
    /// `None` for failed cases, which are not scored
    pub counts: Option<MatchCounts>,
    pub false_positives: Vec<IssueCategory>,
    pub missed: Vec<IssueCategory>,
    pub savings: Option<SavingsAccuracy>,
    pub cost_usd: f64,
    pub error: Option<String>,
}

impl CaseResult {
    pub fn is_success(&self) -> bool {
        self.counts.is_some()
    }
}

/// Wall-clock latency per case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub mean_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

impl LatencySummary {
    pub fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let mean_ms = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        Self {
            mean_ms,
            p50_ms: percentile(&sorted, 0.50),
            p95_ms: percentile(&sorted, 0.95),
        }
    }
}

/// Nearest-rank percentile over sorted samples.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Savings accuracy across successful cases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SavingsSummary {
    pub mean_relative_error: f64,
    pub within_tolerance: usize,
    pub cases: usize,
    pub tolerance: f64,
}

/// Scores for one provider over one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub provider: String,
    pub total_cases: usize,
    pub successful_cases: usize,
    pub failed_cases: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub counts: MatchCounts,
    pub per_category: Vec<CategoryMetrics>,
    pub savings: SavingsSummary,
    pub latency: LatencySummary,
    pub total_cost_usd: f64,
    pub duration_seconds: f64,
    pub cases: Vec<CaseResult>,
}

impl AggregateMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_cases == 0 {
            0.0
        } else {
            self.successful_cases as f64 / self.total_cases as f64
        }
    }

    /// Flat metrics mapping pushed to the snapshot store.
    pub fn metrics_map(&self) -> BTreeMap<String, JsonValue> {
        let per_category: BTreeMap<String, JsonValue> = self
            .per_category
            .iter()
            .map(|c| {
                (
                    c.category.to_string(),
                    json!({
                        "precision": c.precision,
                        "recall": c.recall,
                        "f1": c.f1,
                        "total_detected": c.total_detected,
                        "total_missed": c.total_missed,
                        "total_cases": c.total_cases,
                    }),
                )
            })
            .collect();

        let mut map = BTreeMap::new();
        map.insert("precision".to_string(), json!(self.precision));
        map.insert("recall".to_string(), json!(self.recall));
        map.insert("f1".to_string(), json!(self.f1));
        map.insert("true_positives".to_string(), json!(self.counts.true_positives));
        map.insert("false_positives".to_string(), json!(self.counts.false_positives));
        map.insert("false_negatives".to_string(), json!(self.counts.false_negatives));
        map.insert("total_cases".to_string(), json!(self.total_cases));
        map.insert("successful_cases".to_string(), json!(self.successful_cases));
        map.insert("failed_cases".to_string(), json!(self.failed_cases));
        map.insert("latency_mean_ms".to_string(), json!(self.latency.mean_ms));
        map.insert("latency_p50_ms".to_string(), json!(self.latency.p50_ms));
        map.insert("latency_p95_ms".to_string(), json!(self.latency.p95_ms));
        map.insert("total_cost_usd".to_string(), json!(self.total_cost_usd));
        map.insert(
            "savings_mean_relative_error".to_string(),
            json!(self.savings.mean_relative_error),
        );
        map.insert(
            "savings_within_tolerance".to_string(),
            json!(self.savings.within_tolerance),
        );
        map.insert("per_category".to_string(), json!(per_category));
        map
    }
}

/// Scores providers against a dataset.
pub struct BenchmarkEvaluator {
    pipeline: Arc<AnalysisPipeline>,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
    savings_tolerance: f64,
}

impl BenchmarkEvaluator {
    pub fn new(pipeline: Arc<AnalysisPipeline>) -> Self {
        let defaults = RuntimeConfig::default();
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(defaults.max_concurrency)),
            max_concurrency: defaults.max_concurrency,
            savings_tolerance: defaults.savings_tolerance,
        }
    }

    pub fn from_config(pipeline: Arc<AnalysisPipeline>, config: &RuntimeConfig) -> Result<Self, PipelineError> {
        if config.max_concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if config.savings_tolerance.is_nan() || config.savings_tolerance < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "savings_tolerance must be non-negative, got {}",
                config.savings_tolerance
            )));
        }
        Ok(Self::new(pipeline)
            .with_max_concurrency(config.max_concurrency)
            .with_savings_tolerance(config.savings_tolerance))
    }

    /// Cases in flight at once, across every provider. Clamped to at least 1.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self.permits = Arc::new(Semaphore::new(self.max_concurrency));
        self
    }

    pub fn with_savings_tolerance(mut self, tolerance: f64) -> Self {
        self.savings_tolerance = tolerance;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Score one provider. Individual case failures are recorded, never
    /// propagated; only an unregistered provider key is an error.
    pub async fn run(&self, cases: &[BenchmarkCase], provider_key: &str) -> Result<AggregateMetrics, PipelineError> {
        if !self.pipeline.registry().contains(provider_key) {
            return Err(PipelineError::UnknownProvider(provider_key.to_string()));
        }

        tracing::info!(provider = provider_key, cases = cases.len(), "Benchmark run started");
        let started = Instant::now();

        let results = join_all(cases.iter().map(|case| self.run_case(case, provider_key))).await;
        let metrics = self.aggregate(provider_key, cases, results, started.elapsed().as_secs_f64());

        tracing::info!(
            provider = provider_key,
            precision = metrics.precision,
            recall = metrics.recall,
            f1 = metrics.f1,
            failed = metrics.failed_cases,
            "Benchmark run finished"
        );
        Ok(metrics)
    }

    /// Score several providers concurrently, sharing the concurrency limit.
    ///
    /// Every key is checked before any case runs.
    pub async fn run_all(&self, cases: &[BenchmarkCase], provider_keys: &[String]) -> Result<Vec<AggregateMetrics>, PipelineError> {
        if let Some(unknown) = provider_keys
            .iter()
            .find(|key| !self.pipeline.registry().contains(key))
        {
            return Err(PipelineError::UnknownProvider(unknown.clone()));
        }

        join_all(provider_keys.iter().map(|key| self.run(cases, key)))
            .await
            .into_iter()
            .collect()
    }

    async fn run_case(&self, case: &BenchmarkCase, provider_key: &str) -> (PipelineOutput, u64) {
        // The semaphore is never closed, so acquire cannot fail
        let _permit = self.permits.acquire().await.ok();
        let started = Instant::now();
        let output = self
            .pipeline
            .run(&case.input_text, RunOptions::new().with_provider(provider_key))
            .await;
        (output, started.elapsed().as_millis() as u64)
    }

    fn aggregate(
        &self,
        provider_key: &str,
        cases: &[BenchmarkCase],
        results: Vec<(PipelineOutput, u64)>,
        duration_seconds: f64,
    ) -> AggregateMetrics {
        let mut accumulator = MetricsAccumulator::new();
        let mut case_results = Vec::with_capacity(cases.len());
        let mut latencies = Vec::with_capacity(cases.len());
        let mut savings = SavingsSummary {
            tolerance: self.savings_tolerance,
            ..Default::default()
        };
        let mut relative_error_sum = 0.0;

        for (case, (output, latency_ms)) in cases.iter().zip(results) {
            latencies.push(latency_ms);
            let (result, matched) = self.score_case(case, &output, latency_ms);

            if let Some(matched) = &matched {
                accumulator.add_case(&case.expected_issues, matched);
            } else {
                tracing::warn!(case = %case.id, status = ?result.status, error = ?result.error, "Benchmark case failed");
            }
            if let Some(accuracy) = &result.savings {
                savings.cases += 1;
                relative_error_sum += accuracy.relative_error;
                if accuracy.within_tolerance {
                    savings.within_tolerance += 1;
                }
            }
            case_results.push(result);
        }

        if savings.cases > 0 {
            savings.mean_relative_error = relative_error_sum / savings.cases as f64;
        }

        let counts = accumulator.overall();
        let successful_cases = accumulator.cases();
        AggregateMetrics {
            provider: provider_key.to_string(),
            total_cases: cases.len(),
            successful_cases,
            failed_cases: cases.len() - successful_cases,
            precision: counts.precision(),
            recall: counts.recall(),
            f1: counts.f1(),
            counts,
            per_category: accumulator.categories(),
            savings,
            latency: LatencySummary::from_samples(&latencies),
            total_cost_usd: case_results.iter().map(|c| c.cost_usd).sum(),
            duration_seconds,
            cases: case_results,
        }
    }

    fn score_case(
        &self,
        case: &BenchmarkCase,
        output: &PipelineOutput,
        latency_ms: u64,
    ) -> (CaseResult, Option<CaseMatch>) {
        let detected = output.issues().iter().map(|i| i.category.clone()).collect();
        let cost_usd = if output.analysis.meta.contains_key("cache_hit") {
            0.0
        } else {
            output
                .analysis
                .meta
                .get("estimated_cost_usd")
                .and_then(JsonValue::as_f64)
                .unwrap_or(0.0)
        };
        let error = output
            .workflow_log
            .stages
            .iter()
            .find_map(|r| r.error.clone());

        if output.status != RunStatus::Completed {
            let result = CaseResult {
                case_id: case.id.clone(),
                status: output.status,
                latency_ms,
                detected,
                counts: None,
                false_positives: Vec::new(),
                missed: Vec::new(),
                savings: None,
                cost_usd,
                error,
            };
            return (result, None);
        }

        let matched = match_issues(&case.expected_issues, output.issues());
        let result = CaseResult {
            case_id: case.id.clone(),
            status: output.status,
            latency_ms,
            detected,
            counts: Some(matched.counts),
            false_positives: matched.false_positives.clone(),
            missed: matched.missed.clone(),
            savings: Some(savings_accuracy(
                output.savings.total_savings,
                case.expected_savings(),
                self.savings_tolerance,
            )),
            cost_usd,
            error,
        };
        (result, Some(matched))
    }
}

impl std::fmt::Debug for BenchmarkEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchmarkEvaluator")
            .field("pipeline", &self.pipeline)
            .field("max_concurrency", &self.max_concurrency)
            .field("savings_tolerance", &self.savings_tolerance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{AnalysisProvider, ProviderError, ProviderRegistry, RuleBasedProvider, RULE_BASED_KEY};
    use async_trait::async_trait;
    use billguard_core::{categories, AnalysisResult, ExpectedIssue, FactSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const DUPLICATED_VISIT: &str = "\
Mercy General Hospital
Statement Date: 03/20/2024
Date of Service: 03/14/2024
03/14/2024  99213  Office visit, established patient  $150.00
03/14/2024  99213  Office visit, established patient  $150.00
Total Charges: $300.00
Amount Due: $300.00
";

    const CLEAN_VISIT: &str = "\
Mercy General Hospital
Date of Service: 03/14/2024
03/14/2024  99213  Office visit, established patient  $150.00
Total Charges: $150.00
Amount Due: $150.00
";

    fn case(id: &str, text: &str, expected: Vec<ExpectedIssue>) -> BenchmarkCase {
        BenchmarkCase {
            id: id.to_string(),
            input_text: text.to_string(),
            expected_issues: expected,
            ..Default::default()
        }
    }

    fn evaluator_with(providers: Vec<(&str, Arc<dyn AnalysisProvider>)>) -> BenchmarkEvaluator {
        let mut registry = ProviderRegistry::new();
        registry.register(RULE_BASED_KEY, Arc::new(RuleBasedProvider::new()));
        registry.set_default(RULE_BASED_KEY);
        for (key, provider) in providers {
            registry.register(key, provider);
        }
        let pipeline = AnalysisPipeline::builder(Arc::new(registry)).build().unwrap();
        BenchmarkEvaluator::new(Arc::new(pipeline))
    }

    /// Tracks the largest number of concurrent calls.
    #[derive(Default)]
    struct GaugeProvider {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl AnalysisProvider for GaugeProvider {
        async fn analyze(&self, _raw_text: &str, _facts: Option<&FactSet>) -> Result<AnalysisResult, ProviderError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(AnalysisResult::new("gauge").with_meta("estimated_cost_usd", json!(0.5)))
        }

        fn name(&self) -> &str {
            "gauge"
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl AnalysisProvider for FailingProvider {
        async fn analyze(&self, _raw_text: &str, _facts: Option<&FactSet>) -> Result<AnalysisResult, ProviderError> {
            Err(ProviderError::HttpError("connection reset".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_duplicate_case_scores_perfectly() {
        let evaluator = evaluator_with(Vec::new());
        let cases = vec![case(
            "duplicated_visit",
            DUPLICATED_VISIT,
            vec![ExpectedIssue {
                expected_savings: Some(rust_decimal::Decimal::new(150, 0)),
                ..ExpectedIssue::required(categories::DUPLICATE_CHARGE)
            }],
        )];

        let metrics = evaluator.run(&cases, RULE_BASED_KEY).await.unwrap();

        assert_eq!(metrics.successful_cases, 1);
        assert_eq!(metrics.precision, 1.0);
        assert_eq!(metrics.recall, 1.0);
        assert_eq!(metrics.f1, 1.0);
        assert_eq!(metrics.savings.within_tolerance, 1);
        assert_eq!(metrics.savings.mean_relative_error, 0.0);
        assert_eq!(metrics.per_category[0].category.as_str(), categories::DUPLICATE_CHARGE);
        assert_eq!(metrics.per_category[0].total_cases, 1);
    }

    #[tokio::test]
    async fn test_failed_case_does_not_abort_run() {
        let evaluator = evaluator_with(Vec::new());
        let cases = vec![
            case("blank", "", vec![ExpectedIssue::required(categories::DUPLICATE_CHARGE)]),
            case(
                "duplicated_visit",
                DUPLICATED_VISIT,
                vec![ExpectedIssue::required(categories::DUPLICATE_CHARGE)],
            ),
        ];

        let metrics = evaluator.run(&cases, RULE_BASED_KEY).await.unwrap();

        assert_eq!(metrics.total_cases, 2);
        assert_eq!(metrics.successful_cases, 1);
        assert_eq!(metrics.failed_cases, 1);
        assert_eq!(metrics.success_rate(), 0.5);
        // The failed case's expected issue is not counted as a miss
        assert_eq!(metrics.recall, 1.0);
        assert!(!metrics.cases[0].is_success());
        assert!(metrics.cases[0].error.is_some());
        assert_eq!(metrics.cases[1].case_id, "duplicated_visit");
    }

    #[tokio::test]
    async fn test_provider_errors_count_as_failed_cases() {
        let evaluator = evaluator_with(vec![("failing", Arc::new(FailingProvider))]);
        let cases = vec![case("clean", CLEAN_VISIT, Vec::new())];

        let metrics = evaluator.run(&cases, "failing").await.unwrap();
        assert_eq!(metrics.failed_cases, 1);
        assert_eq!(metrics.cases[0].status, RunStatus::Degraded);
        assert!(metrics.cases[0].error.as_deref().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_optional_issues_do_not_hurt_recall() {
        let evaluator = evaluator_with(Vec::new());
        let cases = vec![case(
            "duplicated_visit",
            DUPLICATED_VISIT,
            vec![
                ExpectedIssue::required(categories::DUPLICATE_CHARGE),
                ExpectedIssue::optional(categories::FACILITY_FEE),
            ],
        )];

        let metrics = evaluator.run(&cases, RULE_BASED_KEY).await.unwrap();
        assert_eq!(metrics.recall, 1.0);
        assert_eq!(metrics.counts.false_negatives, 0);
    }

    #[tokio::test]
    async fn test_clean_case_with_no_detections_scores_zero() {
        let evaluator = evaluator_with(Vec::new());
        let metrics = evaluator
            .run(&[case("clean", CLEAN_VISIT, Vec::new())], RULE_BASED_KEY)
            .await
            .unwrap();

        assert_eq!(metrics.successful_cases, 1);
        assert_eq!(metrics.precision, 0.0);
        assert_eq!(metrics.recall, 0.0);
        assert_eq!(metrics.f1, 0.0);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_an_error() {
        let evaluator = evaluator_with(Vec::new());
        let result = evaluator.run(&[case("c", CLEAN_VISIT, Vec::new())], "gpt-9").await;
        assert_eq!(result.err(), Some(PipelineError::UnknownProvider("gpt-9".to_string())));

        let result = evaluator
            .run_all(&[case("c", CLEAN_VISIT, Vec::new())], &[RULE_BASED_KEY.to_string(), "gpt-9".to_string()])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded_across_providers() {
        let gauge = Arc::new(GaugeProvider::default());
        let evaluator = evaluator_with(vec![
            ("gauge_a", gauge.clone() as Arc<dyn AnalysisProvider>),
            ("gauge_b", gauge.clone() as Arc<dyn AnalysisProvider>),
        ])
        .with_max_concurrency(2);

        let cases: Vec<BenchmarkCase> = (0..6)
            .map(|i| case(&format!("case_{}", i), CLEAN_VISIT, Vec::new()))
            .collect();
        let results = evaluator
            .run_all(&cases, &["gauge_a".to_string(), "gauge_b".to_string()])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].provider, "gauge_a");
        assert_eq!(results[1].provider, "gauge_b");
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
        assert!((results[0].total_cost_usd - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_latency_percentiles() {
        let summary = LatencySummary::from_samples(&[100, 10, 40, 20, 30, 50, 60, 70, 80, 90]);
        assert_eq!(summary.mean_ms, 55.0);
        assert_eq!(summary.p50_ms, 50);
        assert_eq!(summary.p95_ms, 100);
        assert_eq!(LatencySummary::from_samples(&[]), LatencySummary::default());
    }

    #[test]
    fn test_from_config_rejects_zero_concurrency() {
        let mut registry = ProviderRegistry::new();
        registry.register(RULE_BASED_KEY, Arc::new(RuleBasedProvider::new()));
        let pipeline = Arc::new(AnalysisPipeline::builder(Arc::new(registry)).build().unwrap());
        let config = RuntimeConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(
            BenchmarkEvaluator::from_config(pipeline, &config),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_metrics_map_has_store_fields() {
        let evaluator = evaluator_with(Vec::new());
        let metrics = evaluator
            .run(
                &[case("d", DUPLICATED_VISIT, vec![ExpectedIssue::required(categories::DUPLICATE_CHARGE)])],
                RULE_BASED_KEY,
            )
            .await
            .unwrap();

        let map = metrics.metrics_map();
        for key in ["precision", "recall", "f1", "latency_mean_ms", "total_cost_usd", "per_category"] {
            assert!(map.contains_key(key), "missing {}", key);
        }
        assert_eq!(map["per_category"][categories::DUPLICATE_CHARGE]["recall"], 1.0);
    }
}

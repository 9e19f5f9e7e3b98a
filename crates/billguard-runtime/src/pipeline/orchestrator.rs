//! Pipeline orchestrator.
//!
//! Runs one document through the five stages. Every call that can stall
//! (extractor, provider) carries a timeout and listens for cancellation;
//! a timeout or error degrades the stage instead of aborting the run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use billguard_core::{
    parser_for, AnalysisResult, Classification, DocumentClassifier, DocumentType, ExtractionError,
    FactSet, Issue, RuleEngine, SavingsBreakdown,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::cancel::{wait_for_cancel, CancelSignal};
use super::extractor::{FactExtractor, HeuristicExtractor, HEURISTIC_EXTRACTOR};
use super::progress::{emit, ProgressSender};
use super::stage::StageOutcome;
use super::workflow::{replay_key, Stage, StageRecord, StageStatus, WorkflowLog};
use super::PipelineError;
use crate::cache::AnalysisCache;
use crate::config::RuntimeConfig;
use crate::providers::{ProviderError, ProviderRegistry, ResolvedProvider};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage succeeded
    Completed,
    /// Extraction or the provider call failed; the run still finished
    Degraded,
    /// No provider could be resolved
    Failed,
    Cancelled,
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Provider key; the registry default when absent
    pub provider: Option<String>,
    pub cancel: Option<CancelSignal>,
    pub progress: Option<ProgressSender>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, key: impl Into<String>) -> Self {
        self.provider = Some(key.into());
        self
    }

    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Everything a run produced, including partial data on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub classification: Classification,
    pub facts: FactSet,
    /// Provider issues first, then deterministic issues
    pub analysis: AnalysisResult,
    pub savings: SavingsBreakdown,
    pub workflow_log: WorkflowLog,
    pub status: RunStatus,
}

impl PipelineOutput {
    pub fn issues(&self) -> &[Issue] {
        &self.analysis.issues
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// The analysis pipeline.
///
/// Stateless per run apart from the circuit breaker and the result cache,
/// so one instance can serve many concurrent runs.
pub struct AnalysisPipeline {
    registry: Arc<ProviderRegistry>,
    classifier: DocumentClassifier,
    extractors: BTreeMap<String, Arc<dyn FactExtractor>>,
    extractor_overrides: BTreeMap<DocumentType, String>,
    rules: RuleEngine,
    provider_timeout: Duration,
    extractor_timeout: Duration,
    circuit_breaker: CircuitBreaker,
    cache: Option<AnalysisCache>,
}

impl AnalysisPipeline {
    pub fn builder(registry: Arc<ProviderRegistry>) -> PipelineBuilder {
        PipelineBuilder::new(registry)
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn cache(&self) -> Option<&AnalysisCache> {
        self.cache.as_ref()
    }

    fn extractor_key(&self, doc_type: DocumentType) -> &str {
        self.extractor_overrides
            .get(&doc_type)
            .map(String::as_str)
            .unwrap_or(HEURISTIC_EXTRACTOR)
    }

    fn extractor_fingerprint(&self) -> String {
        let overrides: Vec<String> = self
            .extractor_overrides
            .iter()
            .map(|(doc_type, key)| format!("{}={}", doc_type, key))
            .collect();
        format!("{};{}", HEURISTIC_EXTRACTOR, overrides.join(","))
    }

    /// Run one document through every stage.
    ///
    /// Never fails: stage errors are recorded in the workflow log and
    /// reflected in [`PipelineOutput::status`].
    pub async fn run(&self, text: &str, options: RunOptions) -> PipelineOutput {
        let cancel = options.cancel.as_ref();
        let progress = options.progress.as_ref();

        let resolution = self.registry.resolve(options.provider.as_deref());
        let provider_key = match &resolution {
            Ok(resolved) => resolved.key.clone(),
            Err(_) => options.provider.clone().unwrap_or_else(|| "none".to_string()),
        };

        let mut log = WorkflowLog::new(replay_key(
            text,
            &provider_key,
            &self.extractor_fingerprint(),
            &self.rules.fingerprint(),
        ));
        let workflow_id = log.workflow_id;
        tracing::info!(%workflow_id, provider = %provider_key, "Pipeline run started");

        // pre_extraction
        let started = Instant::now();
        let classification = self.classifier.classify(text);
        let doc_type = classification.document_type;
        log = advance(
            log,
            StageRecord::completed(
                Stage::PreExtraction,
                json!({
                    "document_type": doc_type,
                    "confidence": classification.confidence,
                    "scores": classification.scores,
                }),
            )
            .with_duration(started.elapsed()),
            progress,
        );

        // extraction
        if is_cancelled(cancel) {
            return cancelled(log, Stage::Extraction, progress, classification, FactSet::default(), &provider_key);
        }
        let started = Instant::now();
        let extractor_key = self.extractor_key(doc_type).to_string();
        let outcome = match self.extract(&extractor_key, text, doc_type, cancel).await {
            Some(outcome) => outcome.or_partial(FactSet::default),
            None => {
                return cancelled(log, Stage::Extraction, progress, classification, FactSet::default(), &provider_key);
            }
        };
        let extraction_ok = outcome.is_success();
        let record = match outcome.error() {
            None => StageRecord::completed(Stage::Extraction, json!({ "extractor": extractor_key })),
            Some(error) => {
                tracing::warn!(%workflow_id, extractor = %extractor_key, error, "Extraction failed, continuing with empty facts");
                StageRecord::failed(Stage::Extraction, json!({ "extractor": extractor_key }), error)
            }
        };
        let mut facts = outcome.into_value().unwrap_or_default();
        log = advance(log, record.with_duration(started.elapsed()), progress);

        // line_item_parsing
        if is_cancelled(cancel) {
            return cancelled(log, Stage::LineItemParsing, progress, classification, facts, &provider_key);
        }
        let started = Instant::now();
        let record = match parser_for(doc_type) {
            Some(parser) => {
                let items = parser.parse(text, &facts);
                let count = items.len();
                facts = facts.with_line_items(items);
                StageRecord::completed(
                    Stage::LineItemParsing,
                    json!({ "parser": parser.name(), "line_items": count }),
                )
            }
            None => StageRecord::skipped(Stage::LineItemParsing, "no line-item parser for document type"),
        };
        log = advance(log, record.with_duration(started.elapsed()), progress);

        // analysis
        if is_cancelled(cancel) {
            return cancelled(log, Stage::Analysis, progress, classification, facts, &provider_key);
        }
        let started = Instant::now();
        let deterministic = self.rules.evaluate(&facts);
        let deterministic_count = deterministic.len();

        let resolved = match resolution {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(%workflow_id, error = %e, "No provider available, analysis failed");
                let analysis = AnalysisResult::new(&provider_key)
                    .with_issues(deterministic)
                    .with_meta("provider_error", json!(e.to_string()));
                log = advance(
                    log,
                    StageRecord::failed(
                        Stage::Analysis,
                        json!({ "deterministic_issues": deterministic_count }),
                        e.to_string(),
                    )
                    .with_duration(started.elapsed()),
                    progress,
                );
                return finish(classification, facts, analysis, log, RunStatus::Failed);
            }
        };

        let cache_key = extraction_ok.then(|| log.replay_key.clone());
        let outcome = match self
            .call_provider(&resolved, text, &facts, cache_key, cancel)
            .await
        {
            Some(outcome) => outcome.or_partial(|| AnalysisResult::new(&resolved.key)),
            None => return cancelled(log, Stage::Analysis, progress, classification, facts, &provider_key),
        };
        let analysis_error = outcome.error().map(str::to_string);
        let mut analysis = outcome
            .into_value()
            .unwrap_or_else(|| AnalysisResult::new(&resolved.key));

        let provider_count = analysis.issues.len();
        let cache_hit = analysis.meta.contains_key("cache_hit");
        analysis.issues.extend(deterministic);
        analysis
            .meta
            .entry("provider".to_string())
            .or_insert_with(|| json!(resolved.key));
        if let Some(from) = &resolved.fallback_from {
            analysis.meta.insert("fallback_from".to_string(), json!(from));
        }

        let data = json!({
            "provider": resolved.key,
            "fallback_from": resolved.fallback_from,
            "accepts_facts": resolved.provider.accepts_facts(),
            "provider_issues": provider_count,
            "deterministic_issues": deterministic_count,
            "cache_hit": cache_hit,
        });
        let record = match &analysis_error {
            None => StageRecord::completed(Stage::Analysis, data),
            Some(error) => {
                tracing::warn!(%workflow_id, provider = %resolved.key, error = %error, "Provider failed, keeping deterministic issues");
                analysis
                    .meta
                    .insert("provider_error".to_string(), json!(error));
                StageRecord::failed(Stage::Analysis, data, error.clone())
            }
        };
        log = advance(log, record.with_duration(started.elapsed()), progress);

        // complete
        let savings = SavingsBreakdown::from_issues(&analysis.issues);
        log = advance(
            log,
            StageRecord::completed(
                Stage::Complete,
                json!({
                    "issues": analysis.issues.len(),
                    "total_savings": savings.total_savings,
                }),
            ),
            progress,
        );

        let status = if extraction_ok && analysis_error.is_none() {
            RunStatus::Completed
        } else {
            RunStatus::Degraded
        };
        tracing::info!(%workflow_id, status = ?status, issues = analysis.issues.len(), "Pipeline run finished");
        finish(classification, facts, analysis, log, status)
    }

    /// `None` when cancelled.
    async fn extract(
        &self,
        key: &str,
        text: &str,
        doc_type: DocumentType,
        cancel: Option<&CancelSignal>,
    ) -> Option<StageOutcome<FactSet>> {
        let Some(extractor) = self.extractors.get(key) else {
            return Some(StageOutcome::Failure(format!("extractor '{}' is not registered", key)));
        };

        let call = tokio::time::timeout(self.extractor_timeout, extractor.extract(text, doc_type));
        let result = tokio::select! {
            biased;
            _ = wait_for_cancel(cancel) => return None,
            result = call => result,
        };

        Some(match result {
            Ok(Ok(facts)) => StageOutcome::Success(facts),
            Ok(Err(e)) => StageOutcome::Failure(e.to_string()),
            Err(_) => StageOutcome::Failure(ExtractionError::Timeout(self.extractor_timeout).to_string()),
        })
    }

    /// Serve from cache, or call the provider behind the circuit breaker
    /// and timeout.
    ///
    /// `None` when cancelled. Facts are passed only to providers that
    /// accept them. The breaker only gates live calls.
    async fn call_provider(
        &self,
        resolved: &ResolvedProvider,
        text: &str,
        facts: &FactSet,
        cache_key: Option<String>,
        cancel: Option<&CancelSignal>,
    ) -> Option<StageOutcome<AnalysisResult>> {
        let key = resolved.key.as_str();

        let cache = self.cache.as_ref().zip(cache_key);
        if let Some((cache, cache_key)) = &cache {
            if let Some(hit) = cache.get(cache_key).await {
                tracing::debug!(provider = key, "Provider result served from cache");
                return Some(StageOutcome::Success(hit.with_meta("cache_hit", json!(true))));
            }
        }

        if self.circuit_breaker.is_open(key) {
            tracing::warn!(provider = key, "Circuit open, skipping provider call");
            return Some(StageOutcome::Failure(
                ProviderError::CircuitOpen(key.to_string()).to_string(),
            ));
        }

        let facts_arg = resolved.provider.accepts_facts().then_some(facts);
        let call = tokio::time::timeout(
            self.provider_timeout,
            resolved.provider.analyze(text, facts_arg),
        );
        let result = tokio::select! {
            biased;
            _ = wait_for_cancel(cancel) => return None,
            result = call => result,
        };

        Some(match result {
            Ok(Ok(analysis)) => {
                self.circuit_breaker.record_success(key);
                if let Some((cache, cache_key)) = cache {
                    cache.insert(cache_key, analysis.clone()).await;
                }
                StageOutcome::Success(analysis)
            }
            Ok(Err(e)) => {
                self.circuit_breaker.record_failure(key);
                StageOutcome::Failure(e.to_string())
            }
            Err(_) => {
                tracing::warn!(provider = key, timeout = ?self.provider_timeout, "Provider call timed out");
                self.circuit_breaker.record_failure(key);
                StageOutcome::Failure(ProviderError::Timeout(self.provider_timeout).to_string())
            }
        })
    }
}

impl std::fmt::Debug for AnalysisPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisPipeline")
            .field("providers", &self.registry.list())
            .field("extractors", &self.extractors.keys().collect::<Vec<_>>())
            .field("rules", &self.rules.rule_ids())
            .field("provider_timeout", &self.provider_timeout)
            .finish()
    }
}

fn is_cancelled(cancel: Option<&CancelSignal>) -> bool {
    cancel.is_some_and(CancelSignal::is_cancelled)
}

fn advance(log: WorkflowLog, record: StageRecord, progress: Option<&ProgressSender>) -> WorkflowLog {
    let (stage, status) = (record.stage, record.status);
    let log = log.with_stage(record);
    emit(progress, &log, stage, status);
    log
}

fn finish(
    classification: Classification,
    facts: FactSet,
    analysis: AnalysisResult,
    workflow_log: WorkflowLog,
    status: RunStatus,
) -> PipelineOutput {
    let savings = SavingsBreakdown::from_issues(&analysis.issues);
    PipelineOutput {
        classification,
        facts,
        analysis,
        savings,
        workflow_log,
        status,
    }
}

fn cancelled(
    log: WorkflowLog,
    stage: Stage,
    progress: Option<&ProgressSender>,
    classification: Classification,
    facts: FactSet,
    provider_key: &str,
) -> PipelineOutput {
    tracing::info!(workflow_id = %log.workflow_id, stage = %stage, "Pipeline run cancelled");
    let log = advance(log, StageRecord::cancelled(stage), progress);
    finish(
        classification,
        facts,
        AnalysisResult::new(provider_key),
        log,
        RunStatus::Cancelled,
    )
}

/// Builder for [`AnalysisPipeline`].
pub struct PipelineBuilder {
    registry: Arc<ProviderRegistry>,
    classifier: DocumentClassifier,
    extractors: BTreeMap<String, Arc<dyn FactExtractor>>,
    extractor_overrides: BTreeMap<DocumentType, String>,
    rules: RuleEngine,
    provider_timeout: Duration,
    extractor_timeout: Duration,
    circuit_breaker: CircuitBreakerConfig,
    cache: Option<AnalysisCache>,
}

impl PipelineBuilder {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        let defaults = RuntimeConfig::default();
        Self {
            registry,
            classifier: DocumentClassifier::new(),
            extractors: BTreeMap::new(),
            extractor_overrides: BTreeMap::new(),
            rules: RuleEngine::with_defaults(),
            provider_timeout: defaults.provider_timeout,
            extractor_timeout: defaults.extractor_timeout,
            circuit_breaker: defaults.circuit_breaker,
            cache: None,
        }
    }

    /// Apply timeouts, extractor overrides, breaker and cache settings.
    pub fn config(mut self, config: &RuntimeConfig) -> Self {
        self.provider_timeout = config.provider_timeout;
        self.extractor_timeout = config.extractor_timeout;
        self.extractor_overrides = config.extractor_overrides.clone();
        self.circuit_breaker = config.circuit_breaker.clone();
        self.cache = AnalysisCache::from_config(&config.cache);
        self
    }

    pub fn classifier(mut self, classifier: DocumentClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Register an extractor under its own name.
    pub fn extractor(mut self, extractor: Arc<dyn FactExtractor>) -> Self {
        self.extractors.insert(extractor.name().to_string(), extractor);
        self
    }

    pub fn extractor_override(mut self, doc_type: DocumentType, key: impl Into<String>) -> Self {
        self.extractor_overrides.insert(doc_type, key.into());
        self
    }

    pub fn rules(mut self, rules: RuleEngine) -> Self {
        self.rules = rules;
        self
    }

    pub fn provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn extractor_timeout(mut self, timeout: Duration) -> Self {
        self.extractor_timeout = timeout;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn cache(mut self, cache: Option<AnalysisCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn build(self) -> Result<AnalysisPipeline, PipelineError> {
        if self.registry.is_empty() {
            return Err(PipelineError::NoProviders);
        }
        if let Some(default) = self.registry.default_key() {
            if !self.registry.contains(default) {
                return Err(PipelineError::UnknownProvider(default.to_string()));
            }
        }

        let mut extractors = self.extractors;
        extractors
            .entry(HEURISTIC_EXTRACTOR.to_string())
            .or_insert_with(|| Arc::new(HeuristicExtractor));

        for (doc_type, key) in &self.extractor_overrides {
            if !extractors.contains_key(key) {
                return Err(PipelineError::UnknownExtractor {
                    doc_type: *doc_type,
                    key: key.clone(),
                });
            }
        }

        Ok(AnalysisPipeline {
            registry: self.registry,
            classifier: self.classifier,
            extractors,
            extractor_overrides: self.extractor_overrides,
            rules: self.rules,
            provider_timeout: self.provider_timeout,
            extractor_timeout: self.extractor_timeout,
            circuit_breaker: CircuitBreaker::new(self.circuit_breaker),
            cache: self.cache,
        })
    }
}

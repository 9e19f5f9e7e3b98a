//! Benchmark runner

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use billguard_runtime::prompts::PROMPT_VERSION;
use billguard_runtime::{
    build_pipeline, load_cases, AggregateMetrics, BenchmarkEvaluator, ProviderRegistry, Subset,
};
use billguard_store::{BenchmarkTransaction, PushRecord, SnapshotStore, SqliteStore};
use clap::Args;
use tracing::{info, warn};
use uuid::Uuid;

use super::{load_config, print_json};

/// Value of `--model` that selects every registered provider.
const ALL_PROVIDERS: &str = "all";

#[derive(Args)]
pub struct BenchmarkCommand {
    /// Provider key to score, or "all"
    #[arg(long, default_value = ALL_PROVIDERS)]
    model: String,

    /// Case subset: full or high_signal
    #[arg(long, default_value = "full")]
    subset: Subset,

    /// Record each provider's metrics in the snapshot store
    #[arg(long)]
    push: bool,

    /// Environment label for pushed snapshots
    #[arg(long, default_value = "local")]
    environment: String,

    /// Directory of plain-text input documents
    #[arg(long, default_value = "benchmarks/inputs")]
    inputs: PathBuf,

    /// Directory of JSON ground-truth files
    #[arg(long, default_value = "benchmarks/ground_truth")]
    ground_truth: PathBuf,

    /// Runtime config file (YAML)
    #[arg(long, env = "BILLGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Snapshot database path
    #[arg(long, env = "BILLGUARD_DB", default_value = "billguard.db")]
    db: PathBuf,

    /// Maximum cases in flight (overrides config)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Dataset version recorded with pushed snapshots
    #[arg(long, default_value = "v1")]
    dataset_version: String,

    /// Prompt version recorded with pushed snapshots
    #[arg(long, default_value = PROMPT_VERSION)]
    prompt_version: String,

    #[arg(long, env = "GIT_COMMIT_SHA")]
    commit_sha: Option<String>,

    #[arg(long, env = "GIT_BRANCH")]
    branch: Option<String>,

    /// Who or what started the run
    #[arg(long, env = "BILLGUARD_TRIGGERED_BY")]
    triggered_by: Option<String>,

    /// Print full results as JSON instead of a summary table
    #[arg(long)]
    json: bool,
}

impl BenchmarkCommand {
    pub async fn execute(self) -> Result<()> {
        let mut config = load_config(self.config.as_deref())?;
        if let Some(concurrency) = self.concurrency {
            config.max_concurrency = concurrency;
        }

        let pipeline = Arc::new(build_pipeline(&config).context("Invalid runtime configuration")?);
        let keys = provider_keys(&self.model, pipeline.registry())?;

        let cases = load_cases(&self.inputs, &self.ground_truth, self.subset)
            .context("Failed to load benchmark cases")?;
        info!(
            cases = cases.len(),
            subset = self.subset.as_str(),
            providers = ?keys,
            "Starting benchmark"
        );

        let evaluator = BenchmarkEvaluator::from_config(pipeline.clone(), &config)
            .context("Invalid benchmark configuration")?;
        let results = evaluator.run_all(&cases, &keys).await?;

        for metrics in &results {
            if metrics.failed_cases > 0 {
                warn!(
                    provider = %metrics.provider,
                    failed = metrics.failed_cases,
                    "Some cases did not complete"
                );
            }
        }

        if self.json {
            print_json(&results)?;
        } else {
            print_summary(&results);
        }

        if self.push {
            let records: Vec<PushRecord> = results
                .iter()
                .map(|metrics| self.push_record(metrics, cases.len(), pipeline.registry()))
                .collect();
            push(&self.db, records)?;
        }

        Ok(())
    }

    fn push_record(&self, metrics: &AggregateMetrics, dataset_size: usize, registry: &ProviderRegistry) -> PushRecord {
        let model_provider = registry
            .get(&metrics.provider)
            .map(|p| p.name().to_string())
            .unwrap_or_else(|| metrics.provider.clone());

        PushRecord {
            model_version: metrics.provider.clone(),
            model_provider,
            dataset_version: self.dataset_version.clone(),
            dataset_size,
            prompt_version: self.prompt_version.clone(),
            environment: self.environment.clone(),
            run_id: Some(Uuid::new_v4().to_string()),
            triggered_by: self.triggered_by.clone(),
            commit_sha: self.commit_sha.clone(),
            branch_name: self.branch.clone(),
            metrics: metrics.metrics_map(),
            duration_seconds: metrics.duration_seconds,
        }
    }
}

/// Expand `--model` into the provider keys to run.
fn provider_keys(model: &str, registry: &ProviderRegistry) -> Result<Vec<String>> {
    if model == ALL_PROVIDERS {
        let keys = registry.list();
        if keys.is_empty() {
            bail!("No providers registered");
        }
        return Ok(keys);
    }
    if !registry.contains(model) {
        bail!(
            "Unknown provider '{}'; registered: {}",
            model,
            registry.list().join(", ")
        );
    }
    Ok(vec![model.to_string()])
}

fn push(db: &Path, records: Vec<PushRecord>) -> Result<()> {
    let store = SqliteStore::open(db)
        .with_context(|| format!("Failed to open snapshot store: {}", db.display()))?;

    for record in records {
        let transaction = BenchmarkTransaction::from_push_record(record);
        let key = transaction.key();
        let version = store
            .upsert(transaction)
            .with_context(|| format!("Failed to push snapshot for {}", key))?;
        println!("pushed {} v{}", key, version);
    }
    Ok(())
}

fn print_summary(results: &[AggregateMetrics]) {
    println!(
        "{:<20} {:>6} {:>6} {:>6} {:>9} {:>7} {:>7} {:>8} {:>8} {:>9}",
        "provider", "cases", "ok", "failed", "precision", "recall", "f1", "p50_ms", "p95_ms", "cost_usd"
    );
    for m in results {
        println!(
            "{:<20} {:>6} {:>6} {:>6} {:>9.3} {:>7.3} {:>7.3} {:>8} {:>8} {:>9.4}",
            m.provider,
            m.total_cases,
            m.successful_cases,
            m.failed_cases,
            m.precision,
            m.recall,
            m.f1,
            m.latency.p50_ms,
            m.latency.p95_ms,
            m.total_cost_usd,
        );
    }

    for m in results {
        if m.per_category.is_empty() {
            continue;
        }
        println!();
        println!("{}: per category", m.provider);
        for c in &m.per_category {
            println!(
                "  {:<34} p={:.3} r={:.3} f1={:.3} detected={} missed={}",
                c.category.as_str(),
                c.precision,
                c.recall,
                c.f1,
                c.total_detected,
                c.total_missed,
            );
        }
    }
}

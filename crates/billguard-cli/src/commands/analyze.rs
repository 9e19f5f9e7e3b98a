//! Single-document analysis

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use billguard_runtime::{build_pipeline, CancelHandle, RunOptions, RunStatus};
use clap::Args;
use tracing::{info, warn};

use super::{load_config, print_json};

#[derive(Args)]
pub struct AnalyzeCommand {
    /// Plain-text document to analyze
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Provider key (defaults to the configured default provider)
    #[arg(short, long)]
    provider: Option<String>,

    /// Runtime config file (YAML)
    #[arg(long, env = "BILLGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Print only the issues instead of the full pipeline output
    #[arg(long)]
    issues_only: bool,
}

impl AnalyzeCommand {
    pub async fn execute(self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;
        let pipeline = build_pipeline(&config).context("Invalid runtime configuration")?;

        let text = std::fs::read_to_string(&self.input)
            .with_context(|| format!("Failed to read input: {}", self.input.display()))?;

        let cancel = CancelHandle::new();
        let mut options = RunOptions::new().with_cancel(cancel.signal());
        if let Some(provider) = self.provider {
            options = options.with_provider(provider);
        }

        let run = pipeline.run(&text, options);
        tokio::pin!(run);
        let output = tokio::select! {
            output = &mut run => output,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling analysis");
                cancel.cancel();
                run.await
            }
        };

        info!(
            workflow_id = %output.workflow_log.workflow_id,
            status = ?output.status,
            issues = output.issues().len(),
            savings = %output.savings.total_savings,
            "Analysis finished"
        );
        if output.status == RunStatus::Failed {
            warn!("Analysis stage failed; only deterministic issues are reported");
        }

        if self.issues_only {
            print_json(&output.issues())
        } else {
            print_json(&output)
        }
    }
}

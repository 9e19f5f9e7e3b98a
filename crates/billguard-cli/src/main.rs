//! billguard - healthcare billing analysis and provider benchmarking
//!
//! Usage:
//!   billguard analyze bill.txt                      Analyze one document
//!   billguard benchmark --model all --push          Score every provider and record snapshots
//!   billguard history --model claude                Snapshot history for one configuration
//!   billguard checkout --model claude 3             Re-mark version 3 as current
//!   billguard compare --model claude 2 5            Metric deltas between two versions
//!   billguard baseline --model claude 3             Flag version 3 as a baseline

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::analyze::AnalyzeCommand;
use commands::benchmark::BenchmarkCommand;
use commands::snapshots::{BaselineCommand, CheckoutCommand, CompareCommand, HistoryCommand};

#[derive(Parser)]
#[command(
    name = "billguard",
    version,
    about = "Find billing errors in healthcare documents and benchmark analysis providers",
    after_help = "EXAMPLES:\n  \
                  billguard analyze statement.txt --provider rule_based\n  \
                  billguard benchmark --model all --subset high_signal\n  \
                  billguard benchmark --model claude --push --environment ci\n  \
                  billguard compare --model claude 1 2"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analysis pipeline on one document and print the result as JSON
    Analyze(AnalyzeCommand),

    /// Score providers against a ground-truth dataset
    Benchmark(BenchmarkCommand),

    /// List snapshot versions for a configuration
    History(HistoryCommand),

    /// Mark an existing snapshot version as current
    Checkout(CheckoutCommand),

    /// Show metric changes between two snapshot versions
    Compare(CompareCommand),

    /// Set or clear the baseline flag on a snapshot version
    Baseline(BaselineCommand),
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("Failed to set tracing subscriber")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match cli.command {
        Commands::Analyze(cmd) => cmd.execute().await,
        Commands::Benchmark(cmd) => cmd.execute().await,
        Commands::History(cmd) => cmd.execute(),
        Commands::Checkout(cmd) => cmd.execute(),
        Commands::Compare(cmd) => cmd.execute(),
        Commands::Baseline(cmd) => cmd.execute(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_benchmark_flags() {
        let cli = Cli::try_parse_from([
            "billguard",
            "benchmark",
            "--model",
            "all",
            "--subset",
            "high_signal",
            "--push",
            "--environment",
            "ci",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Benchmark(_)));
    }

    #[test]
    fn test_rejects_unknown_subset() {
        let result = Cli::try_parse_from(["billguard", "benchmark", "--subset", "tiny"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_compare_takes_two_versions() {
        assert!(Cli::try_parse_from(["billguard", "compare", "--model", "claude", "1", "2"]).is_ok());
        assert!(Cli::try_parse_from(["billguard", "compare", "--model", "claude", "1"]).is_err());
    }
}

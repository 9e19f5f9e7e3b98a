//! Snapshot store commands

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use billguard_runtime::prompts::PROMPT_VERSION;
use billguard_store::{BenchmarkSnapshot, SnapshotKey, SnapshotStore, SqliteStore};
use clap::Args;

use super::print_json;

/// Identifies one benchmark configuration in the store.
#[derive(Args)]
pub struct KeyArgs {
    /// Provider key the snapshots were recorded for
    #[arg(long)]
    model: String,

    #[arg(long, default_value = "v1")]
    dataset_version: String,

    #[arg(long, default_value = PROMPT_VERSION)]
    prompt_version: String,

    #[arg(long, default_value = "local")]
    environment: String,

    /// Snapshot database path
    #[arg(long, env = "BILLGUARD_DB", default_value = "billguard.db")]
    db: PathBuf,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

impl KeyArgs {
    fn key(&self) -> SnapshotKey {
        SnapshotKey::new(
            &self.model,
            &self.dataset_version,
            &self.prompt_version,
            &self.environment,
        )
    }

    fn open(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db)
            .with_context(|| format!("Failed to open snapshot store: {}", self.db.display()))
    }
}

fn fmt_metric(value: Option<f64>) -> String {
    value.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "-".to_string())
}

fn print_snapshot(snapshot: &BenchmarkSnapshot) {
    let mut flags = Vec::new();
    if snapshot.is_current {
        flags.push("current");
    }
    if snapshot.is_baseline {
        flags.push("baseline");
    }
    println!(
        "v{:<4} {}  p={} r={} f1={} latency_ms={}  {}",
        snapshot.snapshot_version,
        snapshot.created_at.format("%Y-%m-%d %H:%M:%S"),
        fmt_metric(snapshot.precision),
        fmt_metric(snapshot.recall),
        fmt_metric(snapshot.f1),
        fmt_metric(snapshot.latency_ms),
        flags.join(","),
    );
}

#[derive(Args)]
pub struct HistoryCommand {
    #[command(flatten)]
    key: KeyArgs,

    /// Only show baseline snapshots
    #[arg(long)]
    baselines: bool,
}

impl HistoryCommand {
    pub fn execute(self) -> Result<()> {
        let store = self.key.open()?;
        let key = self.key.key();
        let snapshots = if self.baselines {
            store.baselines(&key)?
        } else {
            store.get_history(&key)?
        };

        if self.key.json {
            return print_json(&snapshots);
        }
        if snapshots.is_empty() {
            println!("no snapshots for {}", key);
            return Ok(());
        }
        println!("{}", key);
        for snapshot in &snapshots {
            print_snapshot(snapshot);
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct CheckoutCommand {
    #[command(flatten)]
    key: KeyArgs,

    /// Version to mark as current
    version: u32,
}

impl CheckoutCommand {
    pub fn execute(self) -> Result<()> {
        let snapshot = self
            .key
            .open()?
            .checkout(&self.key.key(), self.version)
            .context("Checkout failed")?;
        if self.key.json {
            print_json(&snapshot)
        } else {
            print_snapshot(&snapshot);
            Ok(())
        }
    }
}

#[derive(Args)]
pub struct CompareCommand {
    #[command(flatten)]
    key: KeyArgs,

    /// Version to compare from
    from: u32,

    /// Version to compare to
    to: u32,
}

impl CompareCommand {
    pub fn execute(self) -> Result<()> {
        let comparison = self
            .key
            .open()?
            .compare(&self.key.key(), self.from, self.to)
            .context("Compare failed")?;
        if self.key.json {
            return print_json(&comparison);
        }

        println!("{}  v{} -> v{}", comparison.key, comparison.from_version, comparison.to_version);
        for change in &comparison.changes {
            let percent = change
                .percent_change
                .map(|p| format!("{:+.1}%", p))
                .unwrap_or_else(|| "n/a".to_string());
            println!(
                "  {:<30} {:>12.4} -> {:>12.4}  {:+.4} ({})",
                change.metric, change.from, change.to, change.absolute_change, percent
            );
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct BaselineCommand {
    #[command(flatten)]
    key: KeyArgs,

    /// Version to flag
    version: u32,

    /// Clear the flag instead of setting it
    #[arg(long)]
    unset: bool,
}

impl BaselineCommand {
    pub fn execute(self) -> Result<()> {
        let snapshot = self
            .key
            .open()?
            .set_baseline(&self.key.key(), self.version, !self.unset)
            .context("Baseline update failed")?;
        if self.key.json {
            print_json(&snapshot)
        } else {
            print_snapshot(&snapshot);
            Ok(())
        }
    }
}

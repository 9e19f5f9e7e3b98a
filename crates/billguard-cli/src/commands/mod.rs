pub mod analyze;
pub mod benchmark;
pub mod snapshots;

use std::path::Path;

use anyhow::{Context as _, Result};
use billguard_runtime::RuntimeConfig;

/// Load the runtime config, or the defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

/// Pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", rendered);
    Ok(())
}

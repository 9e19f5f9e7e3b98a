//! Benchmark dataset discovery.
//!
//! Inputs are plain-text documents (`*.txt`) in one directory; ground truth
//! is a JSON [`BenchmarkCase`] per input in another directory, paired by
//! base filename (`er_visit.txt` <-> `er_visit.json`).

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use billguard_core::BenchmarkCase;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading a dataset.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("No benchmark cases found under {}", .0.display())]
    NoCases(PathBuf),

    #[error("Invalid annotation {}: {message}", path.display())]
    AnnotationSchemaInvalid { path: PathBuf, message: String },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which cases to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subset {
    #[default]
    Full,
    /// Cases with at least one issue that must be detected
    HighSignal,
}

impl Subset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subset::Full => "full",
            Subset::HighSignal => "high_signal",
        }
    }

    pub fn includes(&self, case: &BenchmarkCase) -> bool {
        match self {
            Subset::Full => true,
            Subset::HighSignal => case.is_high_signal(),
        }
    }
}

impl FromStr for Subset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Subset::Full),
            "high_signal" | "high-signal" => Ok(Subset::HighSignal),
            other => Err(format!("unknown subset '{}', expected full or high_signal", other)),
        }
    }
}

/// An input document and its ground-truth file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasePair {
    pub id: String,
    pub input: PathBuf,
    pub ground_truth: PathBuf,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> DatasetError + '_ {
    move |source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Pair every `*.txt` input with `<stem>.json`, sorted by id.
///
/// Inputs without ground truth are skipped with a warning.
pub fn discover_pairs(inputs: &Path, ground_truth: &Path) -> Result<Vec<CasePair>, DatasetError> {
    for dir in [inputs, ground_truth] {
        if !dir.is_dir() {
            return Err(DatasetError::MissingDirectory(dir.to_path_buf()));
        }
    }

    let mut pairs = Vec::new();
    for entry in fs::read_dir(inputs).map_err(io_error(inputs))? {
        let path = entry.map_err(io_error(inputs))?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };

        let annotation = ground_truth.join(format!("{}.json", id));
        if !annotation.is_file() {
            tracing::warn!(case = %id, "No ground truth for input, skipping");
            continue;
        }
        pairs.push(CasePair {
            id,
            input: path,
            ground_truth: annotation,
        });
    }

    pairs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(pairs)
}

/// Read one pair into a case. The input file wins over any `input_text`
/// in the annotation.
pub fn load_case(pair: &CasePair) -> Result<BenchmarkCase, DatasetError> {
    let text = fs::read_to_string(&pair.input).map_err(io_error(&pair.input))?;
    let json = fs::read_to_string(&pair.ground_truth).map_err(io_error(&pair.ground_truth))?;

    let mut case: BenchmarkCase =
        serde_json::from_str(&json).map_err(|e| DatasetError::AnnotationSchemaInvalid {
            path: pair.ground_truth.clone(),
            message: e.to_string(),
        })?;
    case.id = pair.id.clone();
    case.input_text = text;
    Ok(case)
}

/// Discover and load every case in the subset.
///
/// Invalid annotations are logged and excluded; an empty result is an error.
pub fn load_cases(inputs: &Path, ground_truth: &Path, subset: Subset) -> Result<Vec<BenchmarkCase>, DatasetError> {
    let mut cases = Vec::new();
    for pair in discover_pairs(inputs, ground_truth)? {
        match load_case(&pair) {
            Ok(case) if subset.includes(&case) => cases.push(case),
            Ok(_) => {}
            Err(e @ DatasetError::AnnotationSchemaInvalid { .. }) => {
                tracing::warn!(case = %pair.id, error = %e, "Excluding case with invalid annotation");
            }
            Err(e) => return Err(e),
        }
    }

    if cases.is_empty() {
        return Err(DatasetError::NoCases(inputs.to_path_buf()));
    }
    tracing::info!(cases = cases.len(), subset = subset.as_str(), "Benchmark dataset loaded");
    Ok(cases)
}

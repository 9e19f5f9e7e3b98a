//! Benchmark runs: dataset discovery and the evaluator.
//!
//! Matching and metric arithmetic live in `billguard_core::benchmark`.

mod dataset;
mod evaluator;

pub use dataset::{discover_pairs, load_case, load_cases, CasePair, DatasetError, Subset};
pub use evaluator::{
    AggregateMetrics, BenchmarkEvaluator, CaseResult, LatencySummary, SavingsSummary,
};

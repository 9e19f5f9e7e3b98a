//! The five-stage analysis pipeline.
//!
//! ```text
//! pre_extraction -> extraction -> line_item_parsing -> analysis -> complete
//! ```
//!
//! Stage failures are recorded in the [`WorkflowLog`] and the run carries
//! on with whatever data it has. Only configuration problems surface as
//! [`PipelineError`].

mod cancel;
mod extractor;
mod orchestrator;
mod progress;
mod stage;
mod workflow;

pub use cancel::{CancelHandle, CancelSignal};
pub use extractor::{FactExtractor, HeuristicExtractor, HEURISTIC_EXTRACTOR};
pub use orchestrator::{AnalysisPipeline, PipelineBuilder, PipelineOutput, RunOptions, RunStatus};
pub use progress::{progress_channel, spawn_progress_callback, ProgressEvent, ProgressReceiver, ProgressSender};
pub use stage::StageOutcome;
pub use workflow::{replay_key, Stage, StageRecord, StageStatus, WorkflowLog};

use billguard_core::DocumentType;
use thiserror::Error;

/// Configuration-level errors. Stage failures never use this type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("No providers registered")]
    NoProviders,

    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("Extractor '{key}' configured for {doc_type} is not registered")]
    UnknownExtractor { doc_type: DocumentType, key: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

//! Stage outcomes.

use super::workflow::StageStatus;

/// What a stage produced.
///
/// `Partial` carries a usable value alongside the error that degraded it;
/// the run continues with that value.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Success(T),
    Partial { value: T, error: String },
    Failure(String),
}

impl<T> StageOutcome<T> {
    pub fn status(&self) -> StageStatus {
        match self {
            StageOutcome::Success(_) => StageStatus::Completed,
            StageOutcome::Partial { .. } | StageOutcome::Failure(_) => StageStatus::Failed,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            StageOutcome::Success(_) => None,
            StageOutcome::Partial { error, .. } | StageOutcome::Failure(error) => Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success(_))
    }

    /// Take the value, if the stage produced one.
    pub fn into_value(self) -> Option<T> {
        match self {
            StageOutcome::Success(value) | StageOutcome::Partial { value, .. } => Some(value),
            StageOutcome::Failure(_) => None,
        }
    }

    /// Degrade a failure to `Partial` with a fallback value.
    pub fn or_partial(self, fallback: impl FnOnce() -> T) -> Self {
        match self {
            StageOutcome::Failure(error) => StageOutcome::Partial {
                value: fallback(),
                error,
            },
            other => other,
        }
    }
}

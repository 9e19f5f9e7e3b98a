//! Progress events.
//!
//! Events go through an unbounded channel so a slow observer never holds
//! up a run. A closed receiver is ignored.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::workflow::{Stage, StageStatus, WorkflowLog};

/// Sent after every stage transition.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Log as of this transition
    pub log: WorkflowLog,
    pub stage: Stage,
    pub status: StageStatus,
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Run `callback` on a background task for each event.
///
/// The task ends once every sender is dropped.
pub fn spawn_progress_callback<F>(mut callback: F) -> (ProgressSender, JoinHandle<()>)
where
    F: FnMut(ProgressEvent) + Send + 'static,
{
    let (tx, mut rx) = progress_channel();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            callback(event);
        }
    });
    (tx, handle)
}

pub(crate) fn emit(progress: Option<&ProgressSender>, log: &WorkflowLog, stage: Stage, status: StageStatus) {
    if let Some(tx) = progress {
        let _ = tx.send(ProgressEvent {
            log: log.clone(),
            stage,
            status,
        });
    }
}

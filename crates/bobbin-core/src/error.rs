use thiserror::Error;

use crate::domain::{TaskId, TaskStatus};

/// Errors returned synchronously by the scheduler's control API.
///
/// Failures of the work itself are never reported here; they are recorded on
/// the task (see `domain::TaskError`).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task {id} has no result (status={status:?})")]
    NotReady { id: TaskId, status: TaskStatus },

    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("malformed dependencies: {0}")]
    MalformedDependencies(String),

    #[error("invalid periodic interval: must be greater than zero")]
    InvalidInterval,

    #[error("history export failed: {0}")]
    HistoryIo(#[from] std::io::Error),

    #[error("history encoding failed: {0}")]
    HistoryEncode(#[from] serde_json::Error),
}

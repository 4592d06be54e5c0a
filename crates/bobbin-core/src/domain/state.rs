//! Task lifecycle state.

use serde::{Deserialize, Serialize};

/// TaskStatus はタスクの状態
///
/// State transitions:
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Retrying -> Pending (loop until the retry budget is spent)
/// - Pending -> Running -> Failed
/// - Pending -> Failed (missing or failed dependency)
/// - Pending -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// In the priority queue, waiting for its time, its dependencies or a free worker.
    Pending,

    /// Owned by a worker.
    Running,

    /// Failed an attempt; about to go back to the queue.
    Retrying,

    Completed,

    /// Failed permanently.
    Failed,

    /// Cancelled while pending.
    Cancelled,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Can a dependent of a task in this state still hope to run?
    pub fn blocks_dependents(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

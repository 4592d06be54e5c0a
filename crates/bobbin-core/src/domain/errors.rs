//! Errors - タスク単位のエラー型と分類
//!
//! ここで定義するエラーは TaskRecord に記録され、`error()` クエリと
//! `task_failed` イベントで呼び出し側に見えます。dispatcher / worker の
//! ループの外には伝播しません。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::TaskId;

/// ErrorKind は実行エラーの運用分類
///
/// - Transient: 一時的なエラー（リトライ対象）
/// - Permanent: 構造的なエラー（リトライ無意味）
/// - Infrastructure: スケジューラ側の都合（shutdown による中断など）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Why a task attempt, or the task as a whole, failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TaskError {
    /// The work returned an error or panicked.
    #[error("work failed: {0}")]
    Work(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("dependency {0} does not exist")]
    DependencyMissing(TaskId),

    /// A dependency ended Failed or Cancelled.
    #[error("dependency {0} did not complete")]
    DependencyFailed(TaskId),

    /// Still running when the shutdown grace period ran out.
    #[error("aborted by scheduler shutdown")]
    Aborted,
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Work(_) | TaskError::Timeout(_) => ErrorKind::Transient,
            TaskError::DependencyMissing(_) | TaskError::DependencyFailed(_) => {
                ErrorKind::Permanent
            }
            TaskError::Aborted => ErrorKind::Infrastructure,
        }
    }

    /// Only transient failures enter the retry policy.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Error returned by a unit of work.
///
/// Work implementations can build one from any message, or convert any
/// `std::error::Error` with `WorkError::from_error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WorkError {
    message: String,
}

impl WorkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::new(err.to_string())
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for WorkError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for WorkError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<WorkError> for TaskError {
    fn from(err: WorkError) -> Self {
        TaskError::Work(err.message)
    }
}

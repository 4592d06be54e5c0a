//! Events - ライフサイクル通知の種類
//!
//! 配送は `app::events::EventBus` が担当します。

use std::fmt;

use serde::{Deserialize, Serialize};

/// The four notification channels of the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A worker picked the task up and is about to run it.
    TaskStarted,
    TaskCompleted,
    /// Terminal failure (retries exhausted, or a structural error).
    TaskFailed,
    /// An attempt failed and the task goes back to the queue.
    TaskRetrying,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::TaskStarted,
        EventKind::TaskCompleted,
        EventKind::TaskFailed,
        EventKind::TaskRetrying,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::TaskStarted => "task_started",
            EventKind::TaskCompleted => "task_completed",
            EventKind::TaskFailed => "task_failed",
            EventKind::TaskRetrying => "task_retrying",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Input specs for scheduling (TaskOptions / Start / PeriodicOptions).
//!
//! Options are plain data. Defaults that depend on the scheduler
//! configuration (retry budget, retry delay, timeout) stay `None` here and
//! are resolved when the task is scheduled.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::priority::Priority;

/// Caller-supplied key/value bag, carried for observers only.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// When a task becomes eligible to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Start {
    #[default]
    Now,
    After(Duration),
    /// Wall-clock time; a time in the past means "now".
    At(DateTime<Utc>),
}

/// How to schedule one task.
///
/// ```ignore
/// let opts = TaskOptions::new("reindex")
///     .priority(Priority::High)
///     .delay(Duration::from_secs(5))
///     .max_retries(2)
///     .depends_on(fetch_id);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOptions {
    pub name: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub start: Start,
    /// `None` uses the scheduler's default retry budget.
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl TaskOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.start = Start::After(delay);
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.start = Start::At(at);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = Some(retry_delay);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn depends_on(mut self, task_id: TaskId) -> Self {
        self.dependencies.push(task_id);
        self
    }

    pub fn dependencies(mut self, task_ids: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies.extend(task_ids);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The first id listed more than once, if any.
    pub fn duplicate_dependency(&self) -> Option<TaskId> {
        let mut seen = HashSet::with_capacity(self.dependencies.len());
        self.dependencies.iter().copied().find(|id| !seen.insert(*id))
    }
}

/// Repetition of a periodic schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicOptions {
    /// Gap between the end of one run and the start of the next.
    pub interval: Duration,
    /// `None` repeats until shutdown or the first failure.
    pub max_executions: Option<u32>,
}

impl PeriodicOptions {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            max_executions: None,
        }
    }

    pub fn times(mut self, max_executions: u32) -> Self {
        self.max_executions = Some(max_executions);
        self
    }

    /// Is there another run after `executed` runs have completed?
    pub fn has_next(&self, executed: u32) -> bool {
        self.max_executions.is_none_or(|max| executed < max)
    }
}

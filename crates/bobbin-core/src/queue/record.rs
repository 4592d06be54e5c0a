//! Task record: identity + lifecycle state of one unit of work.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::domain::{Metadata, PeriodicOptions, Priority, SeriesId, TaskError, TaskId, TaskStatus};
use crate::ports::{Work, WorkContext};

/// Position of a task inside a periodic schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicRun {
    pub series: SeriesId,
    pub options: PeriodicOptions,
    /// 1-indexed run number.
    pub execution: u32,
}

/// Everything the scheduler knows about one task.
///
/// Design:
/// - This is the "single source of truth" for task state; the priority queue
///   and the admission channel carry ids and copies only.
/// - All state transitions happen through the methods below.
pub struct TaskRecord {
    pub id: TaskId,
    /// Creation order, used for FIFO tie-breaks and newest-first listing.
    pub seq: u64,
    pub name: String,
    pub work: Arc<dyn Work>,
    pub priority: Priority,
    pub status: TaskStatus,

    /// Not eligible before this instant. Only the retry policy moves it.
    pub scheduled_at: Instant,

    pub max_retries: u32,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub timeout: Option<Duration>,
    pub dependencies: Vec<TaskId>,
    pub metadata: Metadata,
    pub periodic: Option<PeriodicRun>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Set once, on Completed.
    pub result: Option<serde_json::Value>,
    /// Set once, on Failed.
    pub error: Option<TaskError>,
    /// Error of the most recent failed attempt (also set while retrying).
    pub last_error: Option<TaskError>,
    /// Duration of the successful attempt.
    pub execution_time: Option<Duration>,
}

impl TaskRecord {
    /// The attempt number the next (or current) run carries, 1-indexed.
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }

    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn context(&self) -> WorkContext {
        WorkContext {
            task_id: self.id,
            name: self.name.clone(),
            attempt: self.attempt(),
            metadata: self.metadata.clone(),
            series: self.periodic.map(|p| p.series),
        }
    }

    /// Pending -> Running.
    pub fn start_attempt(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
    }

    /// Running -> Completed.
    pub fn mark_completed(&mut self, value: serde_json::Value, now: DateTime<Utc>, took: Duration) {
        self.status = TaskStatus::Completed;
        self.result = Some(value);
        self.execution_time = Some(took);
        self.completed_at = Some(now);
    }

    /// Running -> Retrying. The caller re-inserts the task with `requeue`.
    pub fn schedule_retry(&mut self, error: TaskError, next_run_at: Instant) {
        self.status = TaskStatus::Retrying;
        self.retry_count += 1;
        self.scheduled_at = next_run_at;
        self.last_error = Some(error);
    }

    /// Retrying -> Pending.
    pub fn requeue(&mut self) {
        self.status = TaskStatus::Pending;
    }

    /// Running or Pending -> Failed.
    pub fn mark_failed(&mut self, error: TaskError, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.last_error = Some(error.clone());
        self.error = Some(error);
        self.completed_at = Some(now);
    }

    /// Pending -> Cancelled.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(now);
    }

    /// Next run of a periodic series, or `None` when the series is over.
    ///
    /// The successor copies the work and execution parameters. It has no
    /// dependencies: those were satisfied by the first run.
    pub fn successor(
        &self,
        id: TaskId,
        seq: u64,
        created_at: DateTime<Utc>,
        run_at: Instant,
    ) -> Option<TaskRecord> {
        let run = self.periodic?;
        if !run.options.has_next(run.execution) {
            return None;
        }
        Some(TaskRecord {
            id,
            seq,
            name: self.name.clone(),
            work: Arc::clone(&self.work),
            priority: self.priority,
            status: TaskStatus::Pending,
            scheduled_at: run_at,
            max_retries: self.max_retries,
            retry_count: 0,
            retry_delay: self.retry_delay,
            timeout: self.timeout,
            dependencies: Vec::new(),
            metadata: self.metadata.clone(),
            periodic: Some(PeriodicRun {
                execution: run.execution + 1,
                ..run
            }),
            created_at,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            last_error: None,
            execution_time: None,
        })
    }
}

impl fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

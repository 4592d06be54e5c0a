//! Status - ステータスクエリの戻り値
//!
//! - `TaskSummary`: TaskRecord のスナップショット（work 以外の全フィールド）
//! - `Statistics`: スケジューラ全体のカウンタ
//!
//! どちらも値コピーなので、ロックを外した後に observer へ渡せます。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Metadata, Priority, SeriesId, TaskError, TaskId, TaskStatus};
use crate::queue::TaskRecord;

/// Read-only view of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub name: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub dependencies: Vec<TaskId>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<TaskError>,
    pub last_error: Option<TaskError>,
    #[serde(with = "duration_ms::option")]
    pub execution_time: Option<Duration>,
    /// Periodic series this task belongs to.
    pub series: Option<SeriesId>,
    /// 1-indexed run number inside the series.
    pub execution: Option<u32>,
}

impl From<&TaskRecord> for TaskSummary {
    fn from(r: &TaskRecord) -> Self {
        Self {
            id: r.id,
            name: r.name.clone(),
            priority: r.priority,
            status: r.status,
            retry_count: r.retry_count,
            max_retries: r.max_retries,
            dependencies: r.dependencies.clone(),
            metadata: r.metadata.clone(),
            created_at: r.created_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
            result: r.result.clone(),
            error: r.error.clone(),
            last_error: r.last_error.clone(),
            execution_time: r.execution_time,
            series: r.periodic.map(|p| p.series),
            execution: r.periodic.map(|p| p.execution),
        }
    }
}

/// Scheduler-wide counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Tasks currently waiting in the queue.
    pub pending: usize,
    pub running: usize,
    /// Rolling mean over completed tasks.
    #[serde(with = "duration_ms")]
    pub avg_execution_time: Duration,
    pub worker_count: usize,
    /// False once shutdown has begun.
    pub active: bool,
}

/// Monotonic counters, owned by the task table.
#[derive(Debug, Clone, Default)]
pub(crate) struct Counters {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub avg_execution_time: Duration,
}

impl Counters {
    /// Count one completion and fold `took` into the rolling mean.
    pub fn record_completion(&mut self, took: Duration) {
        self.completed += 1;
        let n = self.completed as f64;
        let prev = self.avg_execution_time.as_secs_f64();
        let next = prev + (took.as_secs_f64() - prev) / n;
        self.avg_execution_time = Duration::try_from_secs_f64(next).unwrap_or(took);
    }
}

/// Durations as integer milliseconds in JSON.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => super::serialize(d, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
        }
    }
}
